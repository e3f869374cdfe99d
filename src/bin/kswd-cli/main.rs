// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

mod cli_commands;

use std::io::stdout;
use std::time::Duration;

use anstyle::{AnsiColor, Style};
use clap::builder::styling::Styles;
use clap::{Args, CommandFactory, Parser, crate_description, crate_version};
use clap_complete::{Shell, generate};
use color_eyre::config::HookBuilder;
use color_eyre::eyre::{EyreHandler, Result};
use kinetis_swd::LinkParams;
use owo_colors::OwoColorize;

use crate::cli_commands::ToplevelCommmands;

#[derive(Parser)]
#[command(
	version,
	about = format!("{} v{}", crate_description!(), crate_version!()),
	styles(style()),
	disable_colored_help(false),
	arg_required_else_help(true)
)]
struct CliArguments
{
	#[arg(global = true, long = "swclk", default_value_t = 18)]
	/// GPIO number wired to the target's SWCLK
	swclk: u32,
	#[arg(global = true, long = "swdio", default_value_t = 23)]
	/// GPIO number wired to the target's SWDIO
	swdio: u32,
	#[arg(global = true, long = "half-period-us", default_value_t = 0)]
	/// Delay for each half of an SWCLK cycle, in microseconds
	half_period_us: u64,

	#[command(subcommand)]
	pub subcommand: ToplevelCommmands,
}

#[derive(Args)]
struct CompletionArguments
{
	shell: Shell,
}

impl LinkParams for CliArguments
{
	fn swclk(&self) -> u32
	{
		self.swclk
	}

	fn swdio(&self) -> u32
	{
		self.swdio
	}

	fn half_period(&self) -> Duration
	{
		Duration::from_micros(self.half_period_us)
	}
}

/// Wraps color-eyre's report with a wiring hint when the target stopped answering
struct KswdHandler
{
	inner: Box<dyn EyreHandler>,
}

impl EyreHandler for KswdHandler
{
	fn debug(&self, error: &(dyn std::error::Error + 'static), fmt: &mut core::fmt::Formatter<'_>)
	-> core::fmt::Result
	{
		self.inner.debug(error, fmt)?;
		let link_lost = std::iter::successors(Some(error), |err| err.source()).any(|err| {
			err.downcast_ref::<kinetis_swd::error::Error>()
				.is_some_and(|err| err.requires_reconnect())
		});
		if link_lost {
			writeln!(fmt)?;
			writeln!(fmt)?;
			write!(
				fmt,
				"{}",
				"Check the SWD wiring, target power and the --swclk/--swdio GPIO numbers".yellow()
			)?;
		}
		Ok(())
	}

	// Keeps the "Location:" section of the report pointing at the failing call
	fn track_caller(&mut self, location: &'static std::panic::Location<'static>)
	{
		self.inner.track_caller(location);
	}
}

fn install_error_handler() -> Result<()>
{
	let (panic_hook, eyre_hook) = HookBuilder::default()
		.panic_section(format!(
			"kswd-cli v{} crashed. When reporting this, include the target part and the GPIOs SWCLK and SWDIO are wired to.",
			crate_version!()
		))
		.try_into_hooks()?;
	panic_hook.install();

	let eyre_hook = eyre_hook.into_eyre_hook();
	color_eyre::eyre::set_hook(Box::new(move |error| {
		Box::new(KswdHandler {
			inner: eyre_hook(error),
		})
	}))?;
	Ok(())
}

fn style() -> Styles
{
	let heading = Style::new().bold().fg_color(Some(AnsiColor::Yellow.into()));
	Styles::styled()
		.usage(heading)
		.header(heading)
		.literal(AnsiColor::Green.on_default())
}

fn main() -> Result<()>
{
	install_error_handler()?;
	env_logger::Builder::new()
		.filter_level(log::LevelFilter::Info)
		.parse_default_env()
		.init();

	let cli_args = CliArguments::parse();

	match &cli_args.subcommand {
		ToplevelCommmands::Complete(comp_args) => {
			let mut cmd = CliArguments::command();
			generate(comp_args.shell, &mut cmd, "kswd-cli", &mut stdout());
			Ok(())
		},
		subcommand => subcommand.run(&cli_args),
	}
}
