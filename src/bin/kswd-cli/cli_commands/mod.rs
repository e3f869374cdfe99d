// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

use std::path::{Path, PathBuf};

use clap::Subcommand;
use color_eyre::eyre::{Context, Result};
use directories::ProjectDirs;
use kinetis_swd::adi::AdiPort;
use kinetis_swd::gpio::SysfsGpioLink;
use kinetis_swd::target::{Kinetis, KinetisTimeouts};
use log::error;

use crate::cli_commands::target::{ProgramArguments, RegistersArguments};
use crate::{CliArguments, CompletionArguments};

pub mod target;

#[derive(Subcommand)]
pub enum ToplevelCommmands
{
	/// Erase the target and program an Intel HEX image into its flash
	Program(ProgramArguments),
	/// Print identification and debug state of the connected target
	Info,
	/// Halt the target and dump its core registers
	Registers(RegistersArguments),
	/// Reset the target and let it run
	Reset,
	/// Generate completions data for the shell
	Complete(CompletionArguments),
}

impl ToplevelCommmands
{
	pub fn run(&self, cli_args: &CliArguments) -> Result<()>
	{
		match self {
			Self::Program(program_args) => target::program_command(cli_args, program_args),
			Self::Info => target::info_command(cli_args),
			Self::Registers(registers_args) => target::registers_command(cli_args, registers_args),
			Self::Reset => target::reset_command(cli_args),
			// Handled before any target is touched
			Self::Complete(_) => Ok(()),
		}
	}
}

/// Open the GPIO link and bring up SWD to the target
pub fn attach(cli_args: &CliArguments, timeouts: KinetisTimeouts) -> Result<Kinetis<AdiPort<SysfsGpioLink>>>
{
	let link = SysfsGpioLink::from_params(cli_args).wrap_err("Failed to open the GPIO SWD link")?;
	Kinetis::attach(link, timeouts).wrap_err("Failed to connect to the target over SWD")
}

fn paths() -> ProjectDirs
{
	// Try to get the application paths available
	match ProjectDirs::from("org", "kinetis-swd", "kinetis-swd") {
		Some(paths) => paths,
		None => {
			error!("Failed to get program working paths");
			std::process::exit(2);
		},
	}
}

/// Where to find flash agent builds when none is given: `./firmware` if there is one,
/// otherwise the per-user data directory
pub fn default_firmware_dir() -> PathBuf
{
	let local = Path::new("firmware");
	if local.is_dir() {
		local.to_path_buf()
	} else {
		paths().data_dir().join("firmware")
	}
}
