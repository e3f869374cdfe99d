// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

//! Serial Wire Debug link: the raw bit capability hardware backends provide, and the request
//! framing shared by everything above it.

use std::fmt::{self, Display, Formatter};

use crate::error::Result;

pub mod wire;

pub use self::wire::SwdWire;

/// Types implementing this trait move raw bits across the SWD data line, toggling the clock once
/// per bit. This is all a hardware backend has to provide; request framing, ACK handling and parity
/// all live in [`SwdWire`].
///
/// Bits travel least significant first in both directions. Implementations must accept any
/// `count` from 1 through 32.
pub trait BitLink
{
	/// Drive the low `count` bits of `value` onto SWDIO, bit 0 first
	fn write_bits(&mut self, value: u32, count: u8) -> Result<()>;
	/// Release SWDIO and sample `count` bits from the target, the first received landing in bit 0
	fn read_bits(&mut self, count: u8) -> Result<u32>;
}

// Request packet bit positions, in transmission order
const REQUEST_START: u8 = 1 << 0;
const REQUEST_APNDP: u8 = 1 << 1;
const REQUEST_RNW: u8 = 1 << 2;
const REQUEST_ADDR_SHIFT: u8 = 3;
const REQUEST_PARITY: u8 = 1 << 5;
const REQUEST_PARK: u8 = 1 << 7;
/// The fields the request parity bit covers: APnDP, RnW, A2 and A3
const REQUEST_PARITY_FIELDS: u8 = 0x1e;

// ACK patterns as read off the wire LSB first
const ACK_OK: u8 = 0b001;
const ACK_WAIT: u8 = 0b010;
const ACK_FAULT: u8 = 0b100;
/// Not defined by ADIv5: nothing drove the line, so the pull-up is all we read
const ACK_NOT_PRESENT: u8 = 0b111;

/// Which of the two SWD register spaces a request targets
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Port
{
	Debug,
	Access,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction
{
	Read,
	Write,
}

/// A single SWD request packet
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Request
{
	port: Port,
	direction: Direction,
	/// Register address bits A[3:2]; the rest of a register address is banked via DP SELECT
	address: u8,
}

impl Request
{
	pub fn new(port: Port, direction: Direction, address: u8) -> Self
	{
		Self {
			port,
			direction,
			address: address & 0x0c,
		}
	}

	pub fn read(port: Port, address: u8) -> Self
	{
		Self::new(port, Direction::Read, address)
	}

	pub fn write(port: Port, address: u8) -> Self
	{
		Self::new(port, Direction::Write, address)
	}

	pub fn port(&self) -> Port
	{
		self.port
	}

	pub fn direction(&self) -> Direction
	{
		self.direction
	}

	pub fn address(&self) -> u8
	{
		self.address
	}

	/// Build the framed 8-bit request: start, APnDP, RnW, A[3:2], parity, stop (0), park (1)
	pub fn opcode(&self) -> u8
	{
		let mut opcode = REQUEST_START | REQUEST_PARK;
		if self.port == Port::Access {
			opcode |= REQUEST_APNDP;
		}
		if self.direction == Direction::Read {
			opcode |= REQUEST_RNW;
		}
		opcode |= (self.address >> 2) << REQUEST_ADDR_SHIFT;
		if parity((opcode & REQUEST_PARITY_FIELDS) as u32) {
			opcode |= REQUEST_PARITY;
		}
		opcode
	}
}

impl Display for Request
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		let port = match self.port {
			Port::Debug => "DP",
			Port::Access => "AP",
		};
		let direction = match self.direction {
			Direction::Read => "read",
			Direction::Write => "write",
		};
		write!(f, "{} {} 0x{:02x}", port, direction, self.address)
	}
}

/// Every acknowledgement other than OK
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AckError
{
	/// The target is busy; the same request may be repeated
	Wait,
	/// The target flagged a sticky error that must be cleared via DP ABORT
	Fault,
	/// Nothing answered and SWDIO idled high
	NotPresent,
	/// Any other bit pattern: the link has lost framing
	Protocol(u8),
}

impl AckError
{
	/// Decode a 3-bit acknowledgement, as read LSB first
	pub fn check(ack: u8) -> Result<(), Self>
	{
		match ack {
			ACK_OK => Ok(()),
			ACK_WAIT => Err(Self::Wait),
			ACK_FAULT => Err(Self::Fault),
			ACK_NOT_PRESENT => Err(Self::NotPresent),
			other => Err(Self::Protocol(other)),
		}
	}
}

impl Display for AckError
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		match self {
			Self::Wait => write!(f, "WAIT"),
			Self::Fault => write!(f, "FAULT"),
			Self::NotPresent => write!(f, "no response (is a target connected?)"),
			Self::Protocol(ack) => write!(f, "invalid ACK 0b{:03b}", ack),
		}
	}
}

/// SWD parity: true when `value` has an odd number of set bits
pub fn parity(value: u32) -> bool
{
	value.count_ones() % 2 == 1
}
