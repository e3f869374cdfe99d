// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

use std::path::Path;
use std::time::Duration;

use crate::firmware_layout::DeviceType;

pub mod adi;
pub mod error;
pub mod firmware_file;
pub mod firmware_layout;
pub mod flash_api;
pub mod flasher;
pub mod gpio;
pub mod poll;
pub mod swd;
pub mod target;

/// How the SWD link is wired up
pub trait LinkParams
{
	/// GPIO number driving SWCLK
	fn swclk(&self) -> u32;
	/// GPIO number connected to SWDIO
	fn swdio(&self) -> u32;
	/// Time SWCLK spends in each half of a clock cycle
	fn half_period(&self) -> Duration;
}

/// What and how to flash
pub trait FlashParams
{
	fn device_type(&self) -> DeviceType;
	/// Directory holding the flash agent builds, if not the default
	fn firmware_dir(&self) -> Option<&Path>;
	/// Largest block per program command, if not the default
	fn block_size(&self) -> Option<usize>;
}
