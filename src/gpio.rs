// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

//! Bit-banged SWD over Linux sysfs GPIOs (e.g. a Raspberry Pi header).

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, trace};

use crate::LinkParams;
use crate::error::{Error, Result};
use crate::poll::PollPolicy;
use crate::swd::BitLink;

const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// A single exported sysfs GPIO line
struct SysfsPin
{
	number: u32,
	path: PathBuf,
	value: File,
	output: bool,
}

impl SysfsPin
{
	fn open(root: &Path, number: u32) -> Result<Self>
	{
		let path = root.join(format!("gpio{}", number));
		if !path.exists() {
			debug!("Exporting GPIO {}", number);
			fs::write(root.join("export"), number.to_string())
				.map_err(|err| Error::io(err, "export", format!("GPIO {}", number)))?;
		}

		// udev may take a moment to hand over the freshly exported attributes
		let value_path = path.join("value");
		let value = PollPolicy::new(20, Duration::from_millis(50)).poll("GPIO export", || {
			match OpenOptions::new().read(true).write(true).open(&value_path) {
				Ok(file) => Ok(Some(file)),
				Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => Ok(None),
				Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
				Err(err) => Err(Error::io(err, "open the value of", format!("GPIO {}", number))),
			}
		})?;

		Ok(Self {
			number,
			path,
			value,
			output: false,
		})
	}

	fn set_direction(&mut self, output: bool) -> Result<()>
	{
		let direction = if output { "out" } else { "in" };
		fs::write(self.path.join("direction"), direction)
			.map_err(|err| Error::io(err, "set the direction of", format!("GPIO {}", self.number)))?;
		self.output = output;
		Ok(())
	}

	fn write(&mut self, high: bool) -> Result<()>
	{
		if !self.output {
			self.set_direction(true)?;
		}
		self.value
			.seek(SeekFrom::Start(0))
			.and_then(|_| self.value.write_all(if high { b"1" } else { b"0" }))
			.map_err(|err| Error::io(err, "write the value of", format!("GPIO {}", self.number)))
	}

	fn read(&mut self) -> Result<bool>
	{
		if self.output {
			self.set_direction(false)?;
		}
		let mut level = [0u8; 1];
		self.value
			.seek(SeekFrom::Start(0))
			.and_then(|_| self.value.read_exact(&mut level))
			.map_err(|err| Error::io(err, "read the value of", format!("GPIO {}", self.number)))?;
		Ok(level[0] == b'1')
	}
}

/// SWD link driving SWCLK and SWDIO from two sysfs GPIOs. Data is set up while SWCLK is low and
/// sampled after the falling edge.
pub struct SysfsGpioLink
{
	swclk: SysfsPin,
	swdio: SysfsPin,
	half_period: Duration,
}

impl SysfsGpioLink
{
	pub fn new(swclk: u32, swdio: u32, half_period: Duration) -> Result<Self>
	{
		Self::with_root(Path::new(SYSFS_GPIO_ROOT), swclk, swdio, half_period)
	}

	pub fn from_params<Params>(params: &Params) -> Result<Self>
	where
		Params: LinkParams,
	{
		Self::new(params.swclk(), params.swdio(), params.half_period())
	}

	/// Use a GPIO class directory other than `/sys/class/gpio`
	pub fn with_root(root: &Path, swclk: u32, swdio: u32, half_period: Duration) -> Result<Self>
	{
		debug!("Opening SWD link on GPIOs SWCLK={} SWDIO={}", swclk, swdio);
		let mut link = Self {
			swclk: SysfsPin::open(root, swclk)?,
			swdio: SysfsPin::open(root, swdio)?,
			half_period,
		};
		link.swdio.set_direction(true)?;
		link.swdio.write(false)?;
		link.swclk.set_direction(true)?;
		link.swclk.write(false)?;
		Ok(link)
	}

	fn delay(&self)
	{
		if !self.half_period.is_zero() {
			thread::sleep(self.half_period);
		}
	}

	fn clock(&mut self) -> Result<()>
	{
		self.swclk.write(true)?;
		self.delay();
		self.swclk.write(false)
	}
}

impl BitLink for SysfsGpioLink
{
	fn write_bits(&mut self, value: u32, count: u8) -> Result<()>
	{
		trace!("write {} bits: 0x{:08x}", count, value);
		for bit in 0..count {
			self.swdio.write(value & (1 << bit) != 0)?;
			self.clock()?;
			self.delay();
		}
		Ok(())
	}

	fn read_bits(&mut self, count: u8) -> Result<u32>
	{
		let mut value = 0;
		for bit in 0..count {
			self.clock()?;
			if self.swdio.read()? {
				value |= 1 << bit;
			}
			self.delay();
		}
		trace!("read {} bits: 0x{:08x}", count, value);
		Ok(value)
	}
}

impl Drop for SysfsGpioLink
{
	fn drop(&mut self)
	{
		// Leave SWDIO floating so the target isn't fighting us once we're gone
		let _ = self.swdio.set_direction(false);
	}
}
