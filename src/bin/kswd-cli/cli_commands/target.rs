// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

use std::path::{Path, PathBuf};

use clap::Args;
use color_eyre::eyre::{Context, Result, eyre};
use kinetis_swd::FlashParams;
use kinetis_swd::adi::{AccessPort, MdmAccess};
use kinetis_swd::firmware_file::FirmwareImage;
use kinetis_swd::firmware_layout::{AgentFirmware, DeviceType};
use kinetis_swd::flasher::{FlashProgrammer, ProgrammerConfig, program_firmware};
use kinetis_swd::target::{CoreRegister, KinetisTimeouts};
use log::info;
use owo_colors::OwoColorize;

use crate::CliArguments;
use crate::cli_commands::{attach, default_firmware_dir};

#[derive(Args)]
pub struct ProgramArguments
{
	/// Intel HEX image to write to the target's flash
	hex_file: PathBuf,
	#[arg(short = 'd', long = "device", value_enum, default_value_t = DeviceType::Ke04)]
	/// Kinetis part the flash agent is built for
	device: DeviceType,
	#[arg(long = "firmware-dir")]
	/// Directory holding the flash agent builds (<dir>/<device>/bin/firmware.{hex,map})
	firmware_dir: Option<PathBuf>,
	#[arg(long = "block-size")]
	/// Bytes handed to the flash agent per program command (multiple of 4, at most 256)
	block_size: Option<usize>,
}

impl FlashParams for ProgramArguments
{
	fn device_type(&self) -> DeviceType
	{
		self.device
	}

	fn firmware_dir(&self) -> Option<&Path>
	{
		self.firmware_dir.as_deref()
	}

	fn block_size(&self) -> Option<usize>
	{
		self.block_size
	}
}

#[derive(Args)]
pub struct RegistersArguments
{
	#[arg(long = "resume", default_value_t = false)]
	/// Let the core run again once the registers have been read
	resume: bool,
}

pub fn program_command(cli_args: &CliArguments, program_args: &ProgramArguments) -> Result<()>
{
	let config = ProgrammerConfig::from_params(program_args)?;
	let firmware_dir = program_args
		.firmware_dir()
		.map(Path::to_path_buf)
		.unwrap_or_else(default_firmware_dir);
	let device = program_args.device_type();

	let agent = AgentFirmware::load(&firmware_dir, device)
		.wrap_err_with(|| eyre!("Failed to load the {} flash agent from {}", device, firmware_dir.display()))?;
	let image = FirmwareImage::from_path(&program_args.hex_file)
		.wrap_err_with(|| eyre!("Failed to read {}", program_args.hex_file.display()))?;
	if image.is_empty() {
		return Err(eyre!("{} contains no data to program", program_args.hex_file.display()));
	}

	let mut target = attach(cli_args, config.timeouts)?;
	let mut programmer = FlashProgrammer::new(&mut target, &agent, config)?;
	info!("Programming {}", program_args.hex_file.display());
	program_firmware(&mut programmer, &image).wrap_err("Programming failed")?;
	println!("{}", "Programming complete".green());
	Ok(())
}

pub fn info_command(cli_args: &CliArguments) -> Result<()>
{
	let mut target = attach(cli_args, KinetisTimeouts::default())?;
	let port = target.port();
	println!("SW-DP IDCODE: 0x{:08x}", port.debug_port().idcode());
	println!("AHB-AP IDR:   0x{:08x}", port.idcode()?);
	println!("MDM-AP IDR:   0x{:08x}", port.mdm_idcode()?);

	let secured = target.is_secured()?;
	println!(
		"Security:     {}",
		if secured { "secured".red().to_string() } else { "unsecured".green().to_string() }
	);
	println!("Status:       {}", target.status()?);
	println!("VTOR:         0x{:08x}", target.vector_table_offset()?);
	Ok(())
}

pub fn registers_command(cli_args: &CliArguments, registers_args: &RegistersArguments) -> Result<()>
{
	let mut target = attach(cli_args, KinetisTimeouts::default())?;
	target.enable_debug()?;
	target.halt()?;
	target.wait_halted()?;

	let values = target.registers()?;
	for (register, value) in CoreRegister::all().zip(values) {
		println!("{:>3}: 0x{:08x}", register.to_string(), value);
	}

	if registers_args.resume {
		target.run()?;
	}
	Ok(())
}

pub fn reset_command(cli_args: &CliArguments) -> Result<()>
{
	let mut target = attach(cli_args, KinetisTimeouts::default())?;
	target.enable_debug()?;
	target.reset()?;
	target.run()?;
	info!("Target reset and running");
	Ok(())
}
