// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

use log::trace;

use crate::error::{Error, Result};
use crate::swd::{AckError, BitLink, Port, Request, parity};

/// Clocks spent handing SWDIO between host and target
const TURNAROUND_CYCLES: u8 = 1;
/// Idle clocks after each data phase, so the target can finish processing the transaction
const IDLE_CYCLES: u8 = 2;
/// Clocks with SWDIO high for a line reset (ADIv5 asks for at least 50)
const LINE_RESET_HIGH_BITS: u8 = 64;
/// Clocks with SWDIO low following a line reset
const LINE_RESET_IDLE_BITS: u8 = 8;
/// JTAG-to-SWD select sequence 0b0111_1001_1110_0111, reversed for LSB-first transmission
const JTAG_TO_SWD_SEQUENCE: u16 = 0xe79e;

/// The SWD wire protocol engine. Every call performs exactly one wire transaction (or one fixed
/// sequence) and never retries; WAIT handling is left to the caller.
pub struct SwdWire<L>
{
	link: L,
}

impl<L: BitLink> SwdWire<L>
{
	pub fn new(link: L) -> Self
	{
		Self {
			link,
		}
	}

	pub fn link(&self) -> &L
	{
		&self.link
	}

	pub fn link_mut(&mut self) -> &mut L
	{
		&mut self.link
	}

	pub fn into_inner(self) -> L
	{
		self.link
	}

	/// Put the target's SWD state machine into its reset state. Must be followed by a DP IDCODE read.
	pub fn line_reset(&mut self) -> Result<()>
	{
		trace!("SWD line reset");
		self.write_ones(LINE_RESET_HIGH_BITS)?;
		self.link.write_bits(0, LINE_RESET_IDLE_BITS)
	}

	/// Switch a dual JTAG/SWD port over to SWD, leaving the link freshly line-reset
	pub fn jtag_to_swd(&mut self) -> Result<()>
	{
		trace!("JTAG to SWD switch sequence");
		// Put the JTAG TAP into Test-Logic-Reset first
		self.write_ones(LINE_RESET_HIGH_BITS)?;
		self.link.write_bits(JTAG_TO_SWD_SEQUENCE as u32, 16)?;
		self.line_reset()
	}

	/// Clock out idle cycles with SWDIO low
	pub fn idle(&mut self, cycles: u8) -> Result<()>
	{
		self.link.write_bits(0, cycles)
	}

	pub fn read_cmd(&mut self, port: Port, address: u8) -> Result<u32>
	{
		let request = Request::read(port, address);
		self.request(request)?;

		// Data phase: 4 bytes, each LSB first, least significant byte first
		let mut value = 0;
		for byte in 0..4 {
			value |= self.link.read_bits(8)? << (byte * 8);
		}
		let parity_bit = self.link.read_bits(1)? != 0;
		// Take the line back before looking at the parity so the transaction always completes
		self.link.read_bits(TURNAROUND_CYCLES)?;
		self.idle(IDLE_CYCLES)?;

		if parity_bit != parity(value) {
			return Err(Error::Parity {
				request,
				value,
			});
		}
		trace!("{} -> 0x{:08x}", request, value);
		Ok(value)
	}

	pub fn write_cmd(&mut self, port: Port, address: u8, value: u32) -> Result<()>
	{
		let request = Request::write(port, address);
		self.request(request)?;
		self.link.read_bits(TURNAROUND_CYCLES)?;
		self.write_data(request, value)
	}

	/// Write without looking at the ACK, for use while the link is being (re)established and the
	/// target may not be listening yet
	pub fn write_cmd_ignore_ack(&mut self, port: Port, address: u8, value: u32) -> Result<()>
	{
		let request = Request::write(port, address);
		self.link.write_bits(request.opcode() as u32, 8)?;
		// Turnaround, ACK and turnaround, whatever the line says
		self.link.read_bits(TURNAROUND_CYCLES + 3 + TURNAROUND_CYCLES)?;
		self.write_data(request, value)
	}

	/// Send a request packet and check its acknowledgement. On any ACK other than OK the
	/// line is turned back around to the host before the error is returned, so the next
	/// request frames correctly.
	fn request(&mut self, request: Request) -> Result<()>
	{
		self.link.write_bits(request.opcode() as u32, 8)?;
		self.link.read_bits(TURNAROUND_CYCLES)?;
		let ack = self.link.read_bits(3)? as u8;

		if let Err(ack) = AckError::check(ack) {
			trace!("{} -> {}", request, ack);
			self.link.read_bits(TURNAROUND_CYCLES)?;
			self.idle(IDLE_CYCLES)?;
			return Err(Error::WireAck {
				request,
				ack,
			});
		}
		Ok(())
	}

	fn write_data(&mut self, request: Request, value: u32) -> Result<()>
	{
		for byte in 0..4 {
			self.link.write_bits((value >> (byte * 8)) & 0xff, 8)?;
		}
		self.link.write_bits(parity(value) as u32, 1)?;
		self.idle(IDLE_CYCLES)?;
		trace!("{} <- 0x{:08x}", request, value);
		Ok(())
	}

	fn write_ones(&mut self, count: u8) -> Result<()>
	{
		let mut remaining = count;
		while remaining > 0 {
			let chunk = remaining.min(32);
			self.link.write_bits(u32::MAX, chunk)?;
			remaining -= chunk;
		}
		Ok(())
	}
}
