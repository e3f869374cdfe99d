// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

//! An SWD target emulated bit by bit: it decodes the request packets the host clocks out, answers
//! with turnaround, ACK and data phases, and backs a SW-DP, a MEM-AP over a sparse memory and a
//! Kinetis MDM-AP.

use std::collections::{HashMap, VecDeque};

use kinetis_swd::error::Result;
use kinetis_swd::swd::BitLink;

pub const IDCODE: u32 = 0x2ba0_1477;
pub const MEM_AP_IDR: u32 = 0x0477_0031;
pub const MDM_AP_IDR: u32 = 0x001c_0000;

/// Consecutive high bits that make a line reset
const LINE_RESET_BITS: usize = 50;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum LinkState
{
	/// Waiting for a line reset, as after power-on or a malformed request
	Lockout,
	/// Inside a line reset, waiting for the line to go low
	Reset,
	/// Waiting for a start bit
	Idle,
	Request
	{
		opcode: u8, count: u8
	},
	WriteData
	{
		access: bool, address: u8, data: u64, count: u8
	},
}

pub struct SwdTarget
{
	/// When false nothing drives SWDIO, so every read sees the pull-up
	pub present: bool,
	/// Answer this many upcoming requests with WAIT
	pub wait_next: usize,
	pub memory: HashMap<u32, u32>,
	pub mdm_status: u32,
	pub mdm_control: u32,

	pub line_resets: usize,
	pub aborts: usize,
	pub select_writes: usize,
	pub tar_writes: usize,
	/// Write data phases that arrived with bad parity and were dropped
	pub parity_errors: usize,

	ctrl_stat: u32,
	select: u32,
	csw: u32,
	tar: u32,
	rdbuff: u32,

	state: LinkState,
	ones: usize,
	outgoing: VecDeque<bool>,
}

impl SwdTarget
{
	pub fn new() -> Self
	{
		Self {
			present: true,
			wait_next: 0,
			memory: HashMap::new(),
			mdm_status: 0x0000_0032,
			mdm_control: 0,
			line_resets: 0,
			aborts: 0,
			select_writes: 0,
			tar_writes: 0,
			parity_errors: 0,
			ctrl_stat: 0,
			select: 0,
			csw: 0,
			tar: 0,
			rdbuff: 0,
			state: LinkState::Lockout,
			ones: 0,
			outgoing: VecDeque::new(),
		}
	}

	pub fn absent() -> Self
	{
		Self {
			present: false,
			..Self::new()
		}
	}

	pub fn ctrl_stat(&self) -> u32
	{
		self.ctrl_stat
	}

	pub fn csw(&self) -> u32
	{
		self.csw
	}

	fn host_bit(&mut self, bit: bool)
	{
		if bit {
			self.ones += 1;
		} else {
			self.ones = 0;
		}
		if self.ones >= LINE_RESET_BITS {
			if self.ones == LINE_RESET_BITS {
				self.line_resets += 1;
			}
			self.state = LinkState::Reset;
			self.outgoing.clear();
			return;
		}

		let state = self.state;
		self.state = match state {
			LinkState::Lockout => LinkState::Lockout,
			LinkState::Reset | LinkState::Idle if !bit => LinkState::Idle,
			LinkState::Reset => LinkState::Reset,
			LinkState::Idle => LinkState::Request {
				opcode: 1,
				count: 1,
			},
			LinkState::Request {
				opcode,
				count,
			} => {
				let opcode = opcode | ((bit as u8) << count);
				if count + 1 == 8 {
					self.request(opcode)
				} else {
					LinkState::Request {
						opcode,
						count: count + 1,
					}
				}
			},
			LinkState::WriteData {
				access,
				address,
				data,
				count,
			} => {
				let data = data | ((bit as u64) << count);
				if count + 1 == 33 {
					let value = data as u32;
					let parity = data >> 32 != 0;
					if parity == (value.count_ones() % 2 == 1) {
						self.write_register(access, address, value);
					} else {
						self.parity_errors += 1;
					}
					LinkState::Idle
				} else {
					LinkState::WriteData {
						access,
						address,
						data,
						count: count + 1,
					}
				}
			},
		};
	}

	fn request(&mut self, opcode: u8) -> LinkState
	{
		let start = opcode & 0x01 != 0;
		let stop = opcode & 0x40 != 0;
		let park = opcode & 0x80 != 0;
		let parity_ok = (opcode & 0x3e).count_ones() % 2 == 0;
		if !start || stop || !park || !parity_ok {
			return LinkState::Lockout;
		}
		if !self.present {
			return LinkState::Idle;
		}

		let access = opcode & 0x02 != 0;
		let read = opcode & 0x04 != 0;
		let address = (opcode >> 1) & 0x0c;

		// Turnaround
		self.outgoing.push_back(true);
		if self.wait_next > 0 {
			self.wait_next -= 1;
			self.push_bits(0b010, 3);
			self.outgoing.push_back(true);
			return LinkState::Idle;
		}
		self.push_bits(0b001, 3);

		if read {
			let value = self.read_register(access, address);
			self.push_bits(value, 32);
			self.outgoing.push_back(value.count_ones() % 2 == 1);
			self.outgoing.push_back(true);
			LinkState::Idle
		} else {
			self.outgoing.push_back(true);
			LinkState::WriteData {
				access,
				address,
				data: 0,
				count: 0,
			}
		}
	}

	fn push_bits(&mut self, value: u32, count: u8)
	{
		for bit in 0..count {
			self.outgoing.push_back((value >> bit) & 1 != 0);
		}
	}

	fn read_register(&mut self, access: bool, address: u8) -> u32
	{
		if !access {
			return match address {
				0x0 => IDCODE,
				// Power-up requests are acknowledged straight away
				0x4 => self.ctrl_stat | ((self.ctrl_stat & ((1 << 28) | (1 << 30))) << 1),
				0xc => self.rdbuff,
				_ => 0,
			};
		}
		// AP reads are posted: this transaction returns the previous one's result
		let previous = self.rdbuff;
		self.rdbuff = self.read_ap(self.select >> 24, (self.select & 0xf0) as u8 | address);
		previous
	}

	fn read_ap(&mut self, ap: u32, register: u8) -> u32
	{
		match (ap, register) {
			(0, 0x00) => self.csw,
			(0, 0x04) => self.tar,
			(0, 0x0c) => {
				let value = self.memory.get(&self.tar).copied().unwrap_or(0);
				self.advance_tar();
				value
			},
			(0, 0xfc) => MEM_AP_IDR,
			(1, 0x00) => self.mdm_status,
			(1, 0x04) => self.mdm_control,
			(1, 0xfc) => MDM_AP_IDR,
			_ => 0,
		}
	}

	fn write_register(&mut self, access: bool, address: u8, value: u32)
	{
		if !access {
			match address {
				0x0 => self.aborts += 1,
				0x4 => self.ctrl_stat = value,
				0x8 => {
					self.select = value;
					self.select_writes += 1;
				},
				_ => (),
			}
			return;
		}
		match (self.select >> 24, (self.select & 0xf0) as u8 | address) {
			(0, 0x00) => self.csw = value,
			(0, 0x04) => {
				self.tar = value;
				self.tar_writes += 1;
			},
			(0, 0x0c) => {
				self.memory.insert(self.tar, value);
				self.advance_tar();
			},
			(1, 0x04) => self.mdm_control = value,
			_ => (),
		}
	}

	/// Single auto-increment wraps within a 1KiB window, the way real MEM-APs are allowed to
	fn advance_tar(&mut self)
	{
		if self.csw & 0x30 == 0x10 {
			self.tar = (self.tar & !0x3ff) | (self.tar.wrapping_add(4) & 0x3ff);
		}
	}
}

impl BitLink for SwdTarget
{
	fn write_bits(&mut self, value: u32, count: u8) -> Result<()>
	{
		for bit in 0..count {
			self.host_bit((value >> bit) & 1 != 0);
		}
		Ok(())
	}

	fn read_bits(&mut self, count: u8) -> Result<u32>
	{
		self.ones = 0;
		let mut value = 0;
		for bit in 0..count {
			let level = if self.present { self.outgoing.pop_front().unwrap_or(true) } else { true };
			value |= (level as u32) << bit;
		}
		Ok(value)
	}
}
