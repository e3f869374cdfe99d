// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

use std::fmt::{self, Display, Formatter};

use crate::error::Error;

pub mod kinetis;

pub use self::kinetis::{Aircr, DebugRegister, Dcrsr, Demcr, Dhcsr, Kinetis, KinetisTimeouts, TargetStatus};

/// Index into the Cortex-M core register file, R0 through R15
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CoreRegister(u8);

impl CoreRegister
{
	pub const SP: Self = Self(13);
	pub const LR: Self = Self(14);
	pub const PC: Self = Self(15);

	/// Number of registers in the file
	pub const COUNT: usize = 16;

	pub fn index(&self) -> u8
	{
		self.0
	}

	/// Every register in the file, in index order
	pub fn all() -> impl Iterator<Item = Self>
	{
		(0..Self::COUNT as u8).map(Self)
	}
}

impl TryFrom<u8> for CoreRegister
{
	type Error = Error;

	fn try_from(index: u8) -> Result<Self, Self::Error>
	{
		if (index as usize) < Self::COUNT {
			Ok(Self(index))
		} else {
			Err(Error::InvalidRegister(index))
		}
	}
}

impl Display for CoreRegister
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		match *self {
			Self::SP => write!(f, "sp"),
			Self::LR => write!(f, "lr"),
			Self::PC => write!(f, "pc"),
			Self(index) => write!(f, "r{}", index),
		}
	}
}

/// What the host last did to the core. Tracked on the host side only; use
/// [`Kinetis::is_halted`] to ask the target.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CoreState
{
	Unknown,
	DebugEnabled,
	Halted,
	Running,
}

impl Display for CoreState
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		match self {
			Self::Unknown => write!(f, "unknown"),
			Self::DebugEnabled => write!(f, "debug enabled"),
			Self::Halted => write!(f, "halted"),
			Self::Running => write!(f, "running"),
		}
	}
}
