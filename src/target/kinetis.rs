// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use bitfield::bitfield;
use log::{debug, info, warn};

use crate::adi::{AccessPort, AdiPort, DebugPort, MdmAccess, MdmControl, MdmStatus, raw_conversions};
use crate::error::{Error, Result};
use crate::flash_api::pack_words;
use crate::log_and_return;
use crate::poll::PollPolicy;
use crate::swd::BitLink;
use crate::target::{CoreRegister, CoreState};

// Cortex-M system control and debug registers without a decoded form
const VTOR: u32 = 0xe000_ed08;
const DFSR: u32 = 0xe000_ed30;
const DCRDR: u32 = 0xe000_edf8;

/// A memory-mapped Cortex-M debug register
pub trait DebugRegister: From<u32> + Into<u32>
{
	const ADDRESS: u32;
	const NAME: &'static str;
}

bitfield! {
	/// Debug Halting Control and Status Register
	#[derive(Copy, Clone, Default, PartialEq, Eq)]
	pub struct Dhcsr(u32);
	impl Debug;
	pub s_reset_st, _: 25;
	pub s_retire_st, _: 24;
	pub s_lockup, _: 19;
	pub s_sleep, _: 18;
	pub s_halt, _: 17;
	pub s_regrdy, _: 16;
	pub c_maskints, set_c_maskints: 3;
	pub c_step, set_c_step: 2;
	pub c_halt, set_c_halt: 1;
	pub c_debugen, set_c_debugen: 0;
}

impl Dhcsr
{
	/// Writes only land when the upper half carries the debug key
	pub fn enable_write(&mut self)
	{
		self.0 &= !(0xffff << 16);
		self.0 |= 0xa05f << 16;
	}

	/// A control word with the debug key in place and the given halt state requested
	fn control(debugen: bool, halt: bool) -> Self
	{
		let mut dhcsr = Self::default();
		dhcsr.enable_write();
		dhcsr.set_c_debugen(debugen);
		dhcsr.set_c_halt(halt);
		dhcsr
	}
}

impl DebugRegister for Dhcsr
{
	const ADDRESS: u32 = 0xe000_edf0;
	const NAME: &'static str = "DHCSR";
}

bitfield! {
	/// Debug Core Register Selector Register
	#[derive(Copy, Clone, Default)]
	pub struct Dcrsr(u32);
	impl Debug;
	pub _, set_regwnr: 16;
	pub u8, _, set_regsel: 4, 0;
}

impl DebugRegister for Dcrsr
{
	const ADDRESS: u32 = 0xe000_edf4;
	const NAME: &'static str = "DCRSR";
}

bitfield! {
	/// Debug Exception and Monitor Control Register
	#[derive(Copy, Clone, Default)]
	pub struct Demcr(u32);
	impl Debug;
	pub vc_harderr, set_vc_harderr: 10;
	pub vc_corereset, set_vc_corereset: 0;
}

impl DebugRegister for Demcr
{
	const ADDRESS: u32 = 0xe000_edfc;
	const NAME: &'static str = "DEMCR";
}

bitfield! {
	/// Application Interrupt and Reset Control Register
	#[derive(Copy, Clone, Default)]
	pub struct Aircr(u32);
	impl Debug;
	pub u16, _, set_vectkey: 31, 16;
	pub sysresetreq, set_sysresetreq: 2;
}

impl Aircr
{
	pub fn vectkey(&mut self)
	{
		self.set_vectkey(0x05fa);
	}
}

impl DebugRegister for Aircr
{
	const ADDRESS: u32 = 0xe000_ed0c;
	const NAME: &'static str = "AIRCR";
}

raw_conversions!(Dhcsr, Dcrsr, Demcr, Aircr);

fn read_register<R: DebugRegister>(port: &mut impl AccessPort) -> Result<R>
{
	Ok(R::from(port.read_word(R::ADDRESS)?))
}

fn write_register<R: DebugRegister>(port: &mut impl AccessPort, register: R) -> Result<()>
{
	let value = register.into();
	debug!("{} <- 0x{:08x}", R::NAME, value);
	port.write_word(R::ADDRESS, value)
}

/// Bounds on every wait the core debug controller performs
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct KinetisTimeouts
{
	/// Waiting for the debug and system power domains to come up on connect
	pub power_up: PollPolicy,
	/// Waiting for DHCSR.S_REGRDY after a DCRSR write
	pub register_transfer: PollPolicy,
	/// Waiting for DHCSR.S_RESET_ST after requesting a system reset
	pub reset: PollPolicy,
	/// Waiting for DHCSR.S_HALT
	pub halt: PollPolicy,
	/// Waiting for an MDM-AP mass erase to finish
	pub mass_erase: PollPolicy,
}

impl Default for KinetisTimeouts
{
	fn default() -> Self
	{
		Self {
			power_up: PollPolicy::new(100, Duration::from_millis(1)),
			register_transfer: PollPolicy::new(100, Duration::from_millis(1)),
			reset: PollPolicy::new(50, Duration::from_millis(100)),
			halt: PollPolicy::new(50, Duration::from_millis(10)),
			mass_erase: PollPolicy::new(320, Duration::from_millis(50)),
		}
	}
}

/// Snapshot of the core's debug state, for diagnostics
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TargetStatus
{
	pub ap_status: u32,
	pub mdm_status: MdmStatus,
	pub dhcsr: Dhcsr,
	pub dfsr: u32,
}

impl Display for TargetStatus
{
	fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result
	{
		write!(
			f,
			"AHB-AP 0x{:08x}, MDM-AP 0x{:08x}, DHCSR 0x{:08x}, DFSR 0x{:08x}",
			self.ap_status,
			u32::from(self.mdm_status),
			u32::from(self.dhcsr),
			self.dfsr
		)
	}
}

/// Core debug controller for a Kinetis Cortex-M target
pub struct Kinetis<P>
{
	port: P,
	timeouts: KinetisTimeouts,
	state: CoreState,
}

impl<L: BitLink> Kinetis<AdiPort<L>>
{
	/// Bring up the SWD link on `link` and wrap the target's access ports
	pub fn attach(link: L, timeouts: KinetisTimeouts) -> Result<Self>
	{
		let dp = DebugPort::connect(link, timeouts.power_up)?;
		Ok(Self::new(AdiPort::new(dp), timeouts))
	}
}

impl<P> Kinetis<P>
where
	P: AccessPort + MdmAccess,
{
	pub fn new(port: P, timeouts: KinetisTimeouts) -> Self
	{
		Self {
			port,
			timeouts,
			state: CoreState::Unknown,
		}
	}

	pub fn port(&mut self) -> &mut P
	{
		&mut self.port
	}

	pub fn into_inner(self) -> P
	{
		self.port
	}

	pub fn state(&self) -> CoreState
	{
		self.state
	}

	/// Turn on halting debug without stopping the core
	pub fn enable_debug(&mut self) -> Result<()>
	{
		write_register(&mut self.port, Dhcsr::control(true, false))?;
		self.state = CoreState::DebugEnabled;
		Ok(())
	}

	pub fn halt(&mut self) -> Result<()>
	{
		write_register(&mut self.port, Dhcsr::control(true, true))?;
		self.state = CoreState::Halted;
		Ok(())
	}

	/// Reset the system with reset vector catch armed, so the core halts on the first instruction
	pub fn reset(&mut self) -> Result<()>
	{
		debug!("Resetting target with core reset catch");
		let mut demcr = Demcr::default();
		demcr.set_vc_corereset(true);
		write_register(&mut self.port, demcr)?;
		// S_RESET_ST is sticky until read, so clear anything left from an earlier reset
		read_register::<Dhcsr>(&mut self.port)?;
		let mut aircr = Aircr::default();
		aircr.vectkey();
		aircr.set_sysresetreq(true);
		write_register(&mut self.port, aircr)?;

		let port = &mut self.port;
		self.timeouts.reset.poll("core reset", || {
			let dhcsr: Dhcsr = read_register(port)?;
			Ok(dhcsr.s_reset_st().then_some(()))
		})?;
		self.state = CoreState::Halted;
		Ok(())
	}

	/// Release the core: disarm reset catch, leave halting debug and clear the latched debug events
	pub fn run(&mut self) -> Result<()>
	{
		write_register(&mut self.port, Demcr::default())?;
		write_register(&mut self.port, Dhcsr::control(false, false))?;
		let dfsr = self.port.read_word(DFSR)?;
		self.port.write_word(DFSR, dfsr)?;
		self.state = CoreState::Running;
		Ok(())
	}

	pub fn is_halted(&mut self) -> Result<bool>
	{
		Ok(read_register::<Dhcsr>(&mut self.port)?.s_halt())
	}

	pub fn wait_halted(&mut self) -> Result<()>
	{
		let port = &mut self.port;
		self.timeouts.halt.poll("core halt", || {
			let dhcsr: Dhcsr = read_register(port)?;
			Ok(dhcsr.s_halt().then_some(()))
		})?;
		self.state = CoreState::Halted;
		Ok(())
	}

	fn wait_register_ready(&mut self) -> Result<()>
	{
		let port = &mut self.port;
		self.timeouts.register_transfer.poll("core register transfer", || {
			let dhcsr: Dhcsr = read_register(port)?;
			Ok(dhcsr.s_regrdy().then_some(()))
		})
	}

	fn select_register(&mut self, register: CoreRegister, write: bool) -> Result<()>
	{
		let mut dcrsr = Dcrsr::default();
		dcrsr.set_regwnr(write);
		dcrsr.set_regsel(register.index());
		write_register(&mut self.port, dcrsr)
	}

	pub fn register(&mut self, register: CoreRegister) -> Result<u32>
	{
		self.select_register(register, false)?;
		self.wait_register_ready()?;
		let value = self.port.read_word(DCRDR)?;
		debug!("{} = 0x{:08x}", register, value);
		Ok(value)
	}

	pub fn set_register(&mut self, register: CoreRegister, value: u32) -> Result<()>
	{
		debug!("{} <- 0x{:08x}", register, value);
		self.port.write_word(DCRDR, value)?;
		self.select_register(register, true)?;
		self.wait_register_ready()
	}

	/// Read out the whole core register file, R0 through R15
	pub fn registers(&mut self) -> Result<[u32; CoreRegister::COUNT]>
	{
		let mut values = [0; CoreRegister::COUNT];
		for register in CoreRegister::all() {
			values[register.index() as usize] = self.register(register)?;
		}
		Ok(values)
	}

	pub fn vector_table_offset(&mut self) -> Result<u32>
	{
		self.port.read_word(VTOR)
	}

	pub fn set_vector_table_offset(&mut self, offset: u32) -> Result<()>
	{
		self.port.write_word(VTOR, offset)
	}

	pub fn status(&mut self) -> Result<TargetStatus>
	{
		Ok(TargetStatus {
			ap_status: self.port.status()?,
			mdm_status: self.mdm_status()?,
			dhcsr: read_register(&mut self.port)?,
			dfsr: self.port.read_word(DFSR)?,
		})
	}

	fn mdm_status(&mut self) -> Result<MdmStatus>
	{
		Ok(MdmStatus::from(self.port.mdm_status()?))
	}

	pub fn is_secured(&mut self) -> Result<bool>
	{
		Ok(self.mdm_status()?.syssec())
	}

	/// Unsecure the device with an MDM-AP mass erase. This wipes the whole of flash.
	pub fn unsecure(&mut self) -> Result<()>
	{
		let status = self.mdm_status()?;
		if !status.fmeen() {
			warn!("Mass erase is disabled on this device");
			log_and_return!(Error::SecureDeviceUnrecoverable {
				mdm_status: status.into(),
			});
		}

		let port = &mut self.port;
		self.timeouts.mass_erase.poll("flash ready", || {
			Ok(MdmStatus::from(port.mdm_status()?).fready().then_some(()))
		})?;

		info!("Mass erasing device through the MDM-AP");
		let mut control = MdmControl::default();
		control.set_fmeip(true);
		self.port.set_mdm_control(control.into())?;
		let port = &mut self.port;
		self.timeouts.mass_erase.poll("MDM-AP mass erase", || {
			Ok((!MdmControl::from(port.mdm_control()?).fmeip()).then_some(()))
		})?;
		self.port.set_mdm_control(MdmControl::default().into())?;

		let status = self.mdm_status()?;
		if status.syssec() {
			log_and_return!(Error::SecureDeviceUnrecoverable {
				mdm_status: status.into(),
			});
		}
		info!("Device unsecured");
		Ok(())
	}

	/// Copy bytes into target RAM, zero-padding the tail to a whole word
	pub fn write_to_ram(&mut self, address: u32, data: &[u8]) -> Result<()>
	{
		let words = pack_words(data);
		self.port.write_block(address, &words)
	}
}
