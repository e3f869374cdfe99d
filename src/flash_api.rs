// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

//! Layout and status encoding of the command block shared with the RAM-resident flash agent.
//! The agent polls the block's status word for a command, and the host polls it for the ready bit.

use std::fmt::{self, Display, Formatter};

use bitfield::bitfield;

/// Offset of the command/status word
pub const STATUS_OFFSET: u32 = 0;
/// Offset of the flash address a program command writes to
pub const ADDRESS_OFFSET: u32 = 4;
/// Offset of the number of words a program command writes
pub const LENGTH_OFFSET: u32 = 8;
/// Offset of the payload buffer
pub const BUFFER_OFFSET: u32 = 12;
/// Size of the payload buffer in words
pub const BUFFER_WORDS: usize = 64;
/// Size of the payload buffer in bytes, and so the largest block a single program command accepts
pub const BUFFER_BYTES: usize = BUFFER_WORDS * 4;

/// Commands understood by the flash agent
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u32)]
pub enum AgentCommand
{
	MassErase = 0,
	Program = 1,
}

impl AgentCommand
{
	/// The status word to write to issue this command. Writing it clears the ready bit and any
	/// latched status code, handing the block to the agent.
	pub fn status_word(self) -> u32
	{
		let mut status = AgentStatus::new(0);
		status.set_command(self as u8);
		status.into()
	}
}

impl Display for AgentCommand
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		match self {
			Self::MassErase => write!(f, "mass erase"),
			Self::Program => write!(f, "program"),
		}
	}
}

/// Latched outcome of the last agent command
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StatusCode
{
	Ok,
	FlashError,
	NotImplemented,
	Other(u8),
}

impl From<u8> for StatusCode
{
	fn from(code: u8) -> Self
	{
		match code {
			0 => Self::Ok,
			1 => Self::FlashError,
			15 => Self::NotImplemented,
			other => Self::Other(other),
		}
	}
}

bitfield! {
	/// A decoded agent status word
	#[derive(Copy, Clone, PartialEq, Eq)]
	pub struct AgentStatus(u32);
	impl Debug;
	/// FSTAT as captured by the agent when a flash command failed
	pub u8, flash_status, _: 15, 8;
	u8, code_bits, _: 7, 4;
	pub is_ready, _: 3;
	/// The command field, as last written by the host
	pub u8, command, set_command: 2, 0;
}

impl AgentStatus
{
	pub fn new(raw: u32) -> Self
	{
		Self(raw)
	}

	pub fn raw(&self) -> u32
	{
		self.0
	}

	pub fn code(&self) -> StatusCode
	{
		StatusCode::from(self.code_bits())
	}

	/// Whether the agent has latched an error for the last command
	pub fn has_error(&self) -> bool
	{
		self.code_bits() != 0
	}
}

impl From<u32> for AgentStatus
{
	fn from(raw: u32) -> Self
	{
		Self(raw)
	}
}

impl From<AgentStatus> for u32
{
	fn from(status: AgentStatus) -> Self
	{
		status.0
	}
}

impl Display for AgentStatus
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		match self.code() {
			StatusCode::Ok => write!(f, "ok")?,
			StatusCode::FlashError => write!(f, "flash controller error (FSTAT 0x{:02x})", self.flash_status())?,
			StatusCode::NotImplemented => write!(f, "command {} not implemented", self.command())?,
			StatusCode::Other(code) => write!(f, "unknown status code {}", code)?,
		};
		write!(f, " [status 0x{:08x}]", self.0)
	}
}

/// Pack bytes into little-endian words, zero-padding the tail to a whole word
pub fn pack_words(data: &[u8]) -> Vec<u32>
{
	data.chunks(4)
		.map(|chunk| {
			let mut word = [0u8; 4];
			word[..chunk.len()].copy_from_slice(chunk);
			u32::from_le_bytes(word)
		})
		.collect()
}

/// Inverse of [`pack_words`]
pub fn unpack_words(words: &[u32]) -> Vec<u8>
{
	words.iter().flat_map(|word| word.to_le_bytes()).collect()
}
