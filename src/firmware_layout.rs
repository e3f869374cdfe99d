// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

use std::collections::HashMap;
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use clap::builder::PossibleValue;
use log::debug;

use crate::error::{Error, Result};
use crate::firmware_file::FirmwareImage;

/// Symbol names the flash agent's linker script is expected to export
const VECTOR_TABLE_SYMBOL: &str = "interrupt_vector_table";
const FLASH_API_STATE_SYMBOL: &str = "flash_api_state";
const UNSECURED_CONFIG_SYMBOL: &str = "unsecured_config";

/// Kinetis parts a flash agent firmware is available for
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DeviceType
{
	/// KE04 family (FTMRE flash controller)
	Ke04,
	/// KL26Z 32KiB parts (FTFA flash controller)
	Kl26z32,
}

impl DeviceType
{
	pub fn name(&self) -> &'static str
	{
		match self {
			Self::Ke04 => "KE04",
			Self::Kl26z32 => "KL26Z32",
		}
	}

	/// Directory holding this device's agent build outputs, within `firmware_dir`
	pub fn agent_dir(&self, firmware_dir: &Path) -> PathBuf
	{
		firmware_dir.join(self.name()).join("bin")
	}

	pub fn agent_hex(&self, firmware_dir: &Path) -> PathBuf
	{
		self.agent_dir(firmware_dir).join("firmware.hex")
	}

	pub fn agent_map(&self, firmware_dir: &Path) -> PathBuf
	{
		self.agent_dir(firmware_dir).join("firmware.map")
	}
}

impl Display for DeviceType
{
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
	{
		write!(f, "{}", self.name())
	}
}

impl ValueEnum for DeviceType
{
	fn value_variants<'a>() -> &'a [Self]
	{
		&[Self::Ke04, Self::Kl26z32]
	}

	fn to_possible_value(&self) -> Option<PossibleValue>
	{
		match self {
			Self::Ke04 => Some(PossibleValue::new("KE04").alias("ke04")),
			Self::Kl26z32 => Some(PossibleValue::new("KL26Z32").alias("kl26z32")),
		}
	}
}

/// Section addresses pulled out of a GNU ld map file
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SymbolMap
{
	symbols: HashMap<String, u32>,
}

impl SymbolMap
{
	/// Collect every line of the form ` .<name> 0x<address>`; everything else in the map is ignored.
	/// Later definitions of a name win.
	pub fn parse(text: &str) -> Self
	{
		let symbols = text.lines().filter_map(Self::parse_line).collect();
		Self {
			symbols,
		}
	}

	fn parse_line(line: &str) -> Option<(String, u32)>
	{
		let rest = line.strip_prefix(" .")?;
		let name_len = rest
			.find(|c: char| !(c.is_alphanumeric() || c == '_'))
			.unwrap_or(rest.len());
		if name_len == 0 {
			return None;
		}
		let (name, rest) = rest.split_at(name_len);

		let after_space = rest.trim_start();
		// At least one separating whitespace character is required
		if after_space.len() == rest.len() {
			return None;
		}
		let digits = after_space.strip_prefix("0x")?;
		let digits_len = digits
			.find(|c: char| !c.is_ascii_hexdigit())
			.unwrap_or(digits.len());
		let address = u64::from_str_radix(&digits[..digits_len], 16).ok()?;
		Some((name.to_string(), address as u32))
	}

	pub fn from_path(path: &Path) -> Result<Self>
	{
		let text = fs::read_to_string(path).map_err(|err| Error::io(err, "read", path.display().to_string()))?;
		Ok(Self::parse(&text))
	}

	pub fn get(&self, name: &str) -> Option<u32>
	{
		self.symbols.get(name).copied()
	}

	/// Look up a symbol that must be present
	pub fn require(&self, name: &str) -> Result<u32>
	{
		self.get(name).ok_or_else(|| Error::MissingSymbol(name.to_string()))
	}
}

/// Where the flash agent keeps the things the host needs to find in target RAM
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FirmwareLayout
{
	/// Agent vector table: initial stack pointer, then reset vector
	pub vector_table: u32,
	/// The command block shared with the host
	pub flash_api_state: u32,
	/// Copy of a flash configuration field that leaves the device unsecured
	pub unsecured_config: u32,
}

impl FirmwareLayout
{
	pub fn from_symbols(symbols: &SymbolMap) -> Result<Self>
	{
		Ok(Self {
			vector_table: symbols.require(VECTOR_TABLE_SYMBOL)?,
			flash_api_state: symbols.require(FLASH_API_STATE_SYMBOL)?,
			unsecured_config: symbols.require(UNSECURED_CONFIG_SYMBOL)?,
		})
	}
}

/// A flash agent image together with the layout needed to drive it
#[derive(Debug, Clone)]
pub struct AgentFirmware
{
	pub device: DeviceType,
	pub image: FirmwareImage,
	pub layout: FirmwareLayout,
}

impl AgentFirmware
{
	/// Load `<firmware_dir>/<device>/bin/firmware.{hex,map}`
	pub fn load(firmware_dir: &Path, device: DeviceType) -> Result<Self>
	{
		let symbols = SymbolMap::from_path(&device.agent_map(firmware_dir))?;
		let layout = FirmwareLayout::from_symbols(&symbols)?;
		let image = FirmwareImage::from_path(&device.agent_hex(firmware_dir))?;
		debug!("Loaded {} flash agent: {:x?}", device, layout);

		Ok(Self {
			device,
			image,
			layout,
		})
	}
}
