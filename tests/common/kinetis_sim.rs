// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

//! A Kinetis target simulated at the access port level: memory, the core debug registers, the
//! MDM-AP, and a flash agent that springs to life when the core is started at its entry point.

use std::collections::HashMap;
use std::time::Duration;

use kinetis_swd::adi::{AccessPort, MdmAccess};
use kinetis_swd::error::{Error, Result};
use kinetis_swd::firmware_file::FirmwareImage;
use kinetis_swd::firmware_layout::{AgentFirmware, DeviceType, FirmwareLayout};
use kinetis_swd::flasher::ProgrammerConfig;
use kinetis_swd::poll::PollPolicy;
use kinetis_swd::swd::{AckError, Port, Request};
use kinetis_swd::target::{Kinetis, KinetisTimeouts};

pub const VTOR: u32 = 0xe000_ed08;
pub const AIRCR: u32 = 0xe000_ed0c;
pub const DFSR: u32 = 0xe000_ed30;
pub const DHCSR: u32 = 0xe000_edf0;
pub const DCRSR: u32 = 0xe000_edf4;
pub const DCRDR: u32 = 0xe000_edf8;
pub const DEMCR: u32 = 0xe000_edfc;

pub const VECTOR_TABLE: u32 = 0x1fff_fc00;
pub const UNSECURED_CONFIG: u32 = 0x1fff_fcc0;
pub const FLASH_API_STATE: u32 = 0x2000_0100;
pub const AGENT_STACK_TOP: u32 = 0x2000_0c00;
pub const AGENT_ENTRY: u32 = 0x1fff_fd01;
/// FSEC = 0xfe: flash security disabled, mass erase enabled
pub const UNSECURED_CONFIG_WORDS: [u32; 4] = [0xffff_ffff, 0xffff_ffff, 0xffff_ffff, 0xffff_fffe];

/// Flash (program space) ends here on the simulated part
const FLASH_END: u32 = 0x0001_0000;

const MDM_STATUS_FREADY: u32 = 1 << 1;
const MDM_STATUS_SYSSEC: u32 = 1 << 2;
const MDM_STATUS_SYSRES: u32 = 1 << 3;
const MDM_STATUS_FMEEN: u32 = 1 << 5;
const MDM_CONTROL_FMEIP: u32 = 1 << 0;

const AGENT_READY: u32 = 1 << 3;
const AGENT_FLASH_ERROR: u32 = 1 << 4;
const AGENT_NOT_IMPLEMENTED: u32 = 0xf << 4;

/// One program command as the agent saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramCommand
{
	pub address: u32,
	pub words: Vec<u32>,
}

#[derive(Default)]
pub struct SimTarget
{
	pub ram: HashMap<u32, u32>,
	pub flash: HashMap<u32, u32>,

	pub halted: bool,
	pub debug_enabled: bool,
	pub reset_latch: bool,
	pub demcr: u32,
	pub dfsr: u32,
	pub registers: [u32; 16],
	pub dcrdr: u32,
	pub vtor: u32,
	/// VTOR as it stood when the agent started
	pub agent_vtor: Option<u32>,
	pub resets: usize,
	/// Every memory write that landed outside the debug register block
	pub memory_writes: usize,

	pub secured: bool,
	pub mass_erase_enabled: bool,
	pub mdm_erases: usize,

	pub agent_running: bool,
	/// Agent never raises its ready bit
	pub agent_hung: bool,
	/// Status word the agent posts when it starts, instead of plain ready
	pub agent_boot_status: Option<u32>,
	/// Fail the program command with this index (counting from zero) with a flash error
	pub fail_program: Option<usize>,
	/// The program command with this index (counting from zero) never completes
	pub stall_program: Option<usize>,
	pub agent_erases: usize,
	pub program_commands: Vec<ProgramCommand>,

	/// Answer FAULT from the moment this flash address is handed to the agent
	pub fault_on_program_address: Option<u32>,
	/// Every access answers FAULT until the link is re-established
	pub faulted: bool,
	pub reconnects: usize,
}

impl SimTarget
{
	pub fn new() -> Self
	{
		Self {
			mass_erase_enabled: true,
			dfsr: 0x0000_0008,
			..Default::default()
		}
	}

	fn flash_word(&self, address: u32) -> u32
	{
		self.flash.get(&address).copied().unwrap_or(0xffff_ffff)
	}

	/// Bytes currently held in flash from `address` on
	pub fn flash_bytes(&self, address: u32, len: usize) -> Vec<u8>
	{
		(0..len as u32)
			.map(|offset| {
				let byte = address + offset;
				self.flash_word(byte & !3).to_le_bytes()[(byte & 3) as usize]
			})
			.collect()
	}

	fn write_dhcsr(&mut self, value: u32)
	{
		if value >> 16 != 0xa05f {
			return;
		}
		self.debug_enabled = value & 1 != 0;
		if value & 2 != 0 {
			self.halted = true;
		} else if self.halted {
			self.halted = false;
			if self.registers[15] == AGENT_ENTRY && self.registers[13] == AGENT_STACK_TOP {
				self.start_agent();
			}
		}
	}

	fn start_agent(&mut self)
	{
		self.agent_running = true;
		self.agent_vtor = Some(self.vtor);
		if !self.agent_hung {
			let status = self.agent_boot_status.unwrap_or(AGENT_READY);
			self.ram.insert(FLASH_API_STATE, status);
		}
	}

	fn system_reset(&mut self)
	{
		self.resets += 1;
		self.reset_latch = true;
		self.agent_running = false;
		self.vtor = 0;
		// The core comes out of reset on the vector table at the start of flash
		self.registers[13] = self.flash_word(0);
		self.registers[15] = self.flash_word(4);
		self.halted = self.demcr & 1 != 0;
	}

	fn agent_command(&mut self, command: u32)
	{
		if self.agent_hung {
			return;
		}
		let status = match command & 7 {
			0 => {
				self.agent_erases += 1;
				self.flash.clear();
				AGENT_READY
			},
			1 => {
				let address = self.ram.get(&(FLASH_API_STATE + 4)).copied().unwrap_or(0);
				let length = self.ram.get(&(FLASH_API_STATE + 8)).copied().unwrap_or(0);
				let words: Vec<u32> = (0..length)
					.map(|index| self.ram.get(&(FLASH_API_STATE + 12 + index * 4)).copied().unwrap_or(0))
					.collect();
				let index = self.program_commands.len();
				self.program_commands.push(ProgramCommand {
					address,
					words: words.clone(),
				});
				if self.stall_program == Some(index) {
					return;
				}
				if self.fail_program == Some(index) {
					// FSTAT with ACCERR set
					AGENT_READY | AGENT_FLASH_ERROR | (0xa0 << 8)
				} else {
					for (offset, word) in words.into_iter().enumerate() {
						self.flash.insert(address + offset as u32 * 4, word);
					}
					AGENT_READY
				}
			},
			_ => AGENT_READY | AGENT_NOT_IMPLEMENTED,
		};
		self.ram.insert(FLASH_API_STATE, status | (command & 7));
	}

	fn link(&self, request: Request) -> Result<()>
	{
		if self.faulted {
			return Err(Error::WireAck {
				request,
				ack: AckError::Fault,
			});
		}
		Ok(())
	}
}

impl AccessPort for SimTarget
{
	fn reconnect(&mut self) -> Result<()>
	{
		self.reconnects += 1;
		self.faulted = false;
		Ok(())
	}

	fn read_word(&mut self, address: u32) -> Result<u32>
	{
		self.link(Request::read(Port::Access, 0x0c))?;
		Ok(match address {
			DHCSR => {
				let mut dhcsr = 1 << 16;
				if self.debug_enabled {
					dhcsr |= 1;
				}
				if self.halted {
					dhcsr |= 1 << 17;
				}
				if self.reset_latch {
					dhcsr |= 1 << 25;
					self.reset_latch = false;
				}
				dhcsr
			},
			DFSR => self.dfsr,
			DCRDR => self.dcrdr,
			VTOR => self.vtor,
			DEMCR => self.demcr,
			address if address < FLASH_END => self.flash_word(address),
			address => self.ram.get(&address).copied().unwrap_or(0),
		})
	}

	fn write_word(&mut self, address: u32, value: u32) -> Result<()>
	{
		self.link(Request::write(Port::Access, 0x0c))?;
		if address == FLASH_API_STATE + 4 && self.fault_on_program_address == Some(value) {
			self.fault_on_program_address = None;
			self.faulted = true;
			self.link(Request::write(Port::Access, 0x0c))?;
		}
		match address {
			DHCSR => self.write_dhcsr(value),
			DEMCR => self.demcr = value,
			AIRCR if value == 0x05fa_0004 => self.system_reset(),
			DFSR => self.dfsr &= !value,
			DCRDR => self.dcrdr = value,
			VTOR => self.vtor = value,
			DCRSR => {
				let index = (value & 0x1f) as usize;
				if value & (1 << 16) != 0 {
					self.registers[index] = self.dcrdr;
				} else {
					self.dcrdr = self.registers[index];
				}
			},
			_ => {
				self.memory_writes += 1;
				if address < FLASH_END {
					// Flash is not writable through the bus
				} else if address == FLASH_API_STATE && self.agent_running {
					self.agent_command(value);
				} else {
					self.ram.insert(address, value);
				}
			},
		}
		Ok(())
	}

	fn write_block(&mut self, address: u32, words: &[u32]) -> Result<()>
	{
		for (index, &word) in words.iter().enumerate() {
			self.write_word(address + index as u32 * 4, word)?;
		}
		Ok(())
	}

	fn read_block(&mut self, address: u32, count: usize) -> Result<Vec<u32>>
	{
		(0..count as u32).map(|index| self.read_word(address + index * 4)).collect()
	}

	fn status(&mut self) -> Result<u32>
	{
		self.link(Request::read(Port::Access, 0x00))?;
		Ok(0x0300_0052)
	}

	fn idcode(&mut self) -> Result<u32>
	{
		Ok(0x0477_0031)
	}
}

impl MdmAccess for SimTarget
{
	fn mdm_status(&mut self) -> Result<u32>
	{
		self.link(Request::read(Port::Access, 0x00))?;
		let mut status = MDM_STATUS_FREADY | MDM_STATUS_SYSRES;
		if self.secured {
			status |= MDM_STATUS_SYSSEC;
		}
		if self.mass_erase_enabled {
			status |= MDM_STATUS_FMEEN;
		}
		Ok(status)
	}

	fn mdm_control(&mut self) -> Result<u32>
	{
		Ok(0)
	}

	fn set_mdm_control(&mut self, value: u32) -> Result<()>
	{
		self.link(Request::write(Port::Access, 0x04))?;
		if value & MDM_CONTROL_FMEIP != 0 && self.mass_erase_enabled {
			self.mdm_erases += 1;
			self.flash.clear();
			self.secured = false;
		}
		Ok(())
	}

	fn mdm_idcode(&mut self) -> Result<u32>
	{
		Ok(0x001c_0020)
	}
}

/// Build Intel HEX text holding `data` at `address`, 16 bytes to a record
pub fn hex_image(address: u32, data: &[u8]) -> String
{
	let mut lines = vec![hex_record(0, 0x04, &((address >> 16) as u16).to_be_bytes())];
	for (index, chunk) in data.chunks(16).enumerate() {
		let offset = (address & 0xffff) as u16 + (index * 16) as u16;
		lines.push(hex_record(offset, 0x00, chunk));
	}
	lines.push(hex_record(0, 0x01, &[]));
	lines.join("\n")
}

pub fn hex_record(offset: u16, record_type: u8, data: &[u8]) -> String
{
	let mut bytes = vec![data.len() as u8];
	bytes.extend_from_slice(&offset.to_be_bytes());
	bytes.push(record_type);
	bytes.extend_from_slice(data);
	let sum = bytes.iter().fold(0u8, |sum, &byte| sum.wrapping_add(byte));
	bytes.push(sum.wrapping_neg());
	let digits: String = bytes.iter().map(|byte| format!("{:02X}", byte)).collect();
	format!(":{}", digits)
}

/// The flash agent: a vector table, some code and the unsecured configuration field
pub fn agent_firmware() -> AgentFirmware
{
	let mut data = vec![0u8; 0x100];
	data[0..4].copy_from_slice(&AGENT_STACK_TOP.to_le_bytes());
	data[4..8].copy_from_slice(&AGENT_ENTRY.to_le_bytes());
	for (index, word) in UNSECURED_CONFIG_WORDS.iter().enumerate() {
		let offset = (UNSECURED_CONFIG - VECTOR_TABLE) as usize + index * 4;
		data[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
	}
	// Stand-in for the agent's code
	for (index, byte) in data[0x100 - 0x30..].iter_mut().enumerate() {
		*byte = index as u8;
	}

	let image = FirmwareImage::from_reader(hex_image(VECTOR_TABLE, &data).as_bytes())
		.unwrap_or_else(|err| panic!("agent image failed to parse: {}", err));
	AgentFirmware {
		device: DeviceType::Ke04,
		image,
		layout: FirmwareLayout {
			vector_table: VECTOR_TABLE,
			flash_api_state: FLASH_API_STATE,
			unsecured_config: UNSECURED_CONFIG,
		},
	}
}

/// Timeouts that never sleep, so failing waits fail fast
pub fn quick_config() -> ProgrammerConfig
{
	let quick = PollPolicy::new(5, Duration::ZERO);
	ProgrammerConfig {
		block_size: 256,
		timeouts: KinetisTimeouts {
			power_up: quick,
			register_transfer: quick,
			reset: quick,
			halt: quick,
			mass_erase: quick,
		},
		agent_ready: quick,
	}
}

pub fn target(sim: SimTarget) -> Kinetis<SimTarget>
{
	Kinetis::new(sim, quick_config().timeouts)
}
