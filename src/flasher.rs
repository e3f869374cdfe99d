// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

//! Flash programming through a RAM-resident agent. The agent is loaded and started over SWD, then
//! driven through its command block to mass erase the device and program it one block at a time.
//! Once the erase has started, any failure erases the device again and writes back a flash
//! configuration field that leaves it unsecured, so a botched run never locks the part.

use std::rc::Rc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};

use crate::adi::{AccessPort, MdmAccess};
use crate::error::{Error, Result};
use crate::firmware_file::{FirmwareImage, MemoryBlock};
use crate::firmware_layout::{AgentFirmware, FirmwareLayout};
use crate::flash_api::{self, AgentCommand, AgentStatus, pack_words, unpack_words};
use crate::poll::PollPolicy;
use crate::target::{CoreRegister, Kinetis, KinetisTimeouts};
use crate::FlashParams;

/// Start of the Kinetis flash configuration field
pub const FLASH_CONFIG_ADDRESS: u32 = 0x400;
/// Size of the flash configuration field in words
pub const FLASH_CONFIG_WORDS: usize = 4;
/// Agent images go into RAM in chunks of this many bytes
const RAM_LOAD_CHUNK: usize = 0x400;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProgrammerConfig
{
	/// Largest block handed to a single program command, in bytes
	pub block_size: usize,
	pub timeouts: KinetisTimeouts,
	/// Waiting for the agent to set its ready bit, including across a whole mass erase
	pub agent_ready: PollPolicy,
}

impl ProgrammerConfig
{
	pub fn from_params<Params>(params: &Params) -> Result<Self>
	where
		Params: FlashParams,
	{
		let mut config = Self::default();
		if let Some(block_size) = params.block_size() {
			config.block_size = block_size;
		}
		config.validate()?;
		Ok(config)
	}

	/// The block size must be a whole number of words that fits the agent's buffer
	pub fn validate(&self) -> Result<()>
	{
		if self.block_size == 0 || self.block_size % 4 != 0 || self.block_size > flash_api::BUFFER_BYTES {
			return Err(Error::InvalidDataValue {
				what: "flash programming block size",
				value: self.block_size as u64,
			});
		}
		Ok(())
	}
}

impl Default for ProgrammerConfig
{
	fn default() -> Self
	{
		Self {
			block_size: flash_api::BUFFER_BYTES,
			timeouts: KinetisTimeouts::default(),
			agent_ready: PollPolicy::new(2000, Duration::from_millis(5)),
		}
	}
}

/// How far a [`ProgrammingSession`] has got, and so what dropping it has to undo
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase
{
	/// Agent being loaded and started; the target's flash is untouched
	Bootstrap,
	/// Erase or programming under way; failure leaves flash in an unknown state
	Critical,
	/// Image written, target still needs resetting
	Programmed,
	/// Target reset and running again
	Closed,
}

/// Exclusive use of a target for the length of one programming run. Dropping a session that
/// has not been closed resets and resumes the target, after first running the recovery
/// sequence if it was dropped part way through erasing or programming.
pub struct ProgrammingSession<'a, P>
where
	P: AccessPort + MdmAccess,
{
	target: &'a mut Kinetis<P>,
	layout: FirmwareLayout,
	agent_ready: PollPolicy,
	/// Known-good unsecured flash configuration field, taken from the agent image in RAM
	unsecured_config: Vec<u8>,
	phase: Phase,
}

impl<'a, P> ProgrammingSession<'a, P>
where
	P: AccessPort + MdmAccess,
{
	fn new(target: &'a mut Kinetis<P>, layout: FirmwareLayout, agent_ready: PollPolicy) -> Self
	{
		Self {
			target,
			layout,
			agent_ready,
			unsecured_config: Vec::new(),
			phase: Phase::Bootstrap,
		}
	}

	fn status_address(&self) -> u32
	{
		self.layout.flash_api_state + flash_api::STATUS_OFFSET
	}

	/// Halt the target from reset, load the agent into RAM and start it
	fn bootstrap(&mut self, agent: &FirmwareImage) -> Result<()>
	{
		self.target.enable_debug()?;
		self.target.reset()?;
		self.target.wait_halted()?;

		info!("Loading flash agent into target RAM");
		for block in agent.blocks(RAM_LOAD_CHUNK)? {
			debug!("Writing {} bytes to 0x{:08x}", block.data.len(), block.address);
			self.target.write_to_ram(block.address, &block.data)?;
		}

		let config = self
			.target
			.port()
			.read_block(self.layout.unsecured_config, FLASH_CONFIG_WORDS)?;
		self.unsecured_config = unpack_words(&config);

		let stack_top = self.target.port().read_word(self.layout.vector_table)?;
		let reset_vector = self.target.port().read_word(self.layout.vector_table + 4)?;
		debug!("Agent SP: 0x{:08x}, reset vector: 0x{:08x}", stack_top, reset_vector);
		self.target.set_register(CoreRegister::SP, stack_top)?;
		self.target.set_register(CoreRegister::PC, reset_vector)?;
		// Faults taken while the agent runs go through its own table
		self.target.set_vector_table_offset(self.layout.vector_table)?;
		self.target.run()?;

		let status = self.wait_ready()?;
		Self::check(status)
	}

	fn wait_ready(&mut self) -> Result<AgentStatus>
	{
		let address = self.status_address();
		let port = self.target.port();
		self.agent_ready.poll("flash agent ready", || {
			let status = AgentStatus::new(port.read_word(address)?);
			Ok(status.is_ready().then_some(status))
		})
	}

	fn check(status: AgentStatus) -> Result<()>
	{
		if status.has_error() {
			return Err(Error::FlashApiError {
				status,
			});
		}
		Ok(())
	}

	fn command(&mut self, command: AgentCommand) -> Result<AgentStatus>
	{
		debug!("Issuing agent {} command", command);
		let address = self.status_address();
		self.target.port().write_word(address, command.status_word())?;
		self.wait_ready()
	}

	/// Erase the whole of flash, refusing to start while the agent has an error latched
	fn mass_erase(&mut self) -> Result<()>
	{
		let status = self.wait_ready()?;
		Self::check(status)?;
		Self::check(self.command(AgentCommand::MassErase)?)
	}

	fn program_block(&mut self, address: u32, data: &[u8]) -> Result<()>
	{
		let words = pack_words(data);
		if words.len() > flash_api::BUFFER_WORDS {
			return Err(Error::InvalidDataValue {
				what: "flash agent block length",
				value: data.len() as u64,
			});
		}
		debug!("Programming {} bytes at 0x{:08x}", data.len(), address);

		let base = self.layout.flash_api_state;
		let port = self.target.port();
		port.write_word(base + flash_api::ADDRESS_OFFSET, address)?;
		port.write_word(base + flash_api::LENGTH_OFFSET, words.len() as u32)?;
		port.write_block(base + flash_api::BUFFER_OFFSET, &words)?;
		Self::check(self.command(AgentCommand::Program)?)
	}

	/// Put the device back into an erased, unsecured state. Any latched agent error is cleared
	/// by issuing the erase command regardless.
	fn recover(&mut self)
	{
		warn!("Programming failed, erasing the device and restoring an unsecured flash configuration");
		if let Err(err) = self.target.port().reconnect() {
			error!("Failed to re-establish the debug link for recovery: {}", err);
		}
		if let Err(err) = self.wait_ready() {
			error!("Flash agent did not become ready for recovery: {}", err);
		}
		if let Err(err) = self.command(AgentCommand::MassErase).and_then(Self::check) {
			error!("Recovery mass erase failed: {}", err);
		}
		let config = self.unsecured_config.clone();
		match self.program_block(FLASH_CONFIG_ADDRESS, &config) {
			Ok(()) => info!("Flash configuration restored"),
			Err(err) => error!("Failed to restore the flash configuration field: {}", err),
		}
	}

	fn teardown(&mut self) -> Result<()>
	{
		self.target.reset()?;
		self.target.run()
	}

	/// Log the flash configuration field as the device now has it, then reset and resume the target
	fn close(mut self) -> Result<()>
	{
		self.phase = Phase::Programmed;
		let config = self
			.target
			.port()
			.read_block(FLASH_CONFIG_ADDRESS, FLASH_CONFIG_WORDS)?;
		for (index, word) in config.iter().enumerate() {
			info!("Flash config 0x{:03x}: 0x{:08x}", FLASH_CONFIG_ADDRESS as usize + index * 4, word);
		}
		self.teardown()?;
		self.phase = Phase::Closed;
		Ok(())
	}
}

impl<P> Drop for ProgrammingSession<'_, P>
where
	P: AccessPort + MdmAccess,
{
	fn drop(&mut self)
	{
		match self.phase {
			Phase::Closed => return,
			Phase::Critical => self.recover(),
			Phase::Bootstrap | Phase::Programmed => {
				if let Err(err) = self.target.port().reconnect() {
					error!("Failed to re-establish the debug link: {}", err);
				}
			},
		}
		if let Err(err) = self.teardown() {
			error!("Failed to reset and resume the target: {}", err);
		}
	}
}

/// Drives a flash agent to program an image into a target
pub struct FlashProgrammer<'a, P>
where
	P: AccessPort + MdmAccess,
{
	target: &'a mut Kinetis<P>,
	agent: &'a AgentFirmware,
	config: ProgrammerConfig,
}

impl<'a, P> FlashProgrammer<'a, P>
where
	P: AccessPort + MdmAccess,
{
	pub fn new(target: &'a mut Kinetis<P>, agent: &'a AgentFirmware, config: ProgrammerConfig) -> Result<Self>
	{
		config.validate()?;
		Ok(Self {
			target,
			agent,
			config,
		})
	}

	/// Erase the target and program `image` into it. `progress` is called with the number of bytes
	/// each completed block contributed.
	pub fn program<F>(&mut self, image: &FirmwareImage, mut progress: F) -> Result<()>
	where
		F: FnMut(usize),
	{
		// Split the image up before touching the target so a bad one never costs an erase
		let blocks = image.blocks(self.config.block_size)?;
		let layout = self.agent.layout;
		info!(
			"Device: {}, vector table 0x{:08x}, flash API 0x{:08x}",
			self.agent.device, layout.vector_table, layout.flash_api_state
		);

		if self.target.is_secured()? {
			warn!("Device reports that it is secured, attempting to unsecure it");
			self.target.unsecure()?;
		}
		debug!("Target status: {}", self.target.status()?);

		let mut session = ProgrammingSession::new(&mut *self.target, layout, self.config.agent_ready);
		session.bootstrap(&self.agent.image)?;
		info!("Flash agent running");

		session.phase = Phase::Critical;
		info!("Mass erasing flash");
		session.mass_erase()?;
		for MemoryBlock {
			address,
			data,
		} in &blocks
		{
			session.program_block(*address, data)?;
			progress(data.len());
		}
		info!("Programmed {} bytes in {} blocks", image.len(), blocks.len());
		session.close()
	}
}

/// Program `image` with a progress bar on the terminal
pub fn program_firmware<P>(programmer: &mut FlashProgrammer<'_, P>, image: &FirmwareImage) -> Result<()>
where
	P: AccessPort + MdmAccess,
{
	// Default template: `{wide_bar} {pos}/{len}`.
	let progress_bar = ProgressBar::new(image.len() as u64).with_style(
		ProgressStyle::default_bar()
			.template(" {percent:>3}% |{bar:50}| {bytes}/{total_bytes} [{binary_bytes_per_sec} {elapsed}]")
			.unwrap_or_else(|_| ProgressStyle::default_bar()),
	);
	let progress_bar = Rc::new(progress_bar);
	let enclosed = Rc::clone(&progress_bar);

	let result = programmer.program(image, move |written| {
		if enclosed.position() == 0 {
			enclosed.println("Flashing...");
		}
		enclosed.inc(written as u64);
	});
	progress_bar.finish();
	result
}
