// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

//! ADIv5 Debug Port and Access Port layer on top of the SWD wire engine. The core debug controller
//! only ever talks to the target through the [`AccessPort`] and [`MdmAccess`] contracts defined here.

use bitfield::bitfield;
use log::{debug, info};

use crate::error::{Error, Result};
use crate::poll::PollPolicy;
use crate::swd::{BitLink, Port, SwdWire};

// DP registers
const DP_IDCODE: u8 = 0x0;
const DP_ABORT: u8 = 0x0;
const DP_CTRL_STAT: u8 = 0x4;
const DP_SELECT: u8 = 0x8;
const DP_RDBUFF: u8 = 0xc;


/// Register present at the top of every AP's register space
const AP_IDR: u8 = 0xfc;

// MEM-AP registers
const MEM_AP_CSW: u8 = 0x00;
const MEM_AP_TAR: u8 = 0x04;
const MEM_AP_DRW: u8 = 0x0c;
/// TAR auto-increment is only guaranteed within a 1KiB window
const MEM_AP_AUTOINC_WINDOW: u32 = 0x400;

// Kinetis MDM-AP registers
const MDM_STATUS: u8 = 0x00;
const MDM_CONTROL: u8 = 0x04;

/// AP index of the system bus MEM-AP on Kinetis parts
pub const MEM_AP: u8 = 0;
/// AP index of the Kinetis Miscellaneous Debug Module AP
pub const MDM_AP: u8 = 1;

bitfield! {
	/// DP ABORT, write-only
	#[derive(Copy, Clone, Default)]
	pub struct Abort(u32);
	impl Debug;
	pub _, set_orunerrclr: 4;
	pub _, set_wderrclr: 3;
	pub _, set_stkerrclr: 2;
	pub _, set_stkcmpclr: 1;
	pub _, set_dapabort: 0;
}

impl Abort
{
	/// Clear every sticky error flag without aborting the transaction in flight
	pub fn clear_errors() -> Self
	{
		let mut abort = Self::default();
		abort.set_orunerrclr(true);
		abort.set_wderrclr(true);
		abort.set_stkerrclr(true);
		abort.set_stkcmpclr(true);
		abort
	}
}

bitfield! {
	/// DP CTRL/STAT
	#[derive(Copy, Clone, Default)]
	pub struct CtrlStat(u32);
	impl Debug;
	pub csyspwrupack, _: 31;
	pub csyspwrupreq, set_csyspwrupreq: 30;
	pub cdbgpwrupack, _: 29;
	pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
	pub wdataerr, _: 7;
	pub sticky_err, _: 5;
	pub sticky_cmp, _: 4;
	pub sticky_orun, _: 1;
}

bitfield! {
	/// DP SELECT
	#[derive(Copy, Clone, Default, PartialEq, Eq)]
	pub struct Select(u32);
	impl Debug;
	pub u8, ap_sel, set_ap_sel: 31, 24;
	pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
}

bitfield! {
	/// MEM-AP Control/Status Word
	#[derive(Copy, Clone, Default)]
	pub struct Csw(u32);
	impl Debug;
	pub u8, prot, set_prot: 30, 24;
	pub tr_in_prog, _: 7;
	pub device_en, _: 6;
	pub u8, addr_inc, set_addr_inc: 5, 4;
	pub u8, size, set_size: 2, 0;
}

impl Csw
{
	/// 32-bit transfers, single auto-increment, with the default bus protection bits
	pub fn word_increment() -> Self
	{
		let mut csw = Self::default();
		csw.set_prot(0x23);
		csw.set_addr_inc(0b01);
		csw.set_size(0b010);
		csw
	}
}

bitfield! {
	/// Kinetis MDM-AP Status register
	#[derive(Copy, Clone, PartialEq, Eq)]
	pub struct MdmStatus(u32);
	impl Debug;
	pub core_sleep_deep, _: 18;
	pub core_halted, _: 16;
	pub fmeen, _: 5;
	pub backdoor_enabled, _: 4;
	pub sysres, _: 3;
	pub syssec, _: 2;
	pub fready, _: 1;
	pub mass_erase_ack, _: 0;
}

bitfield! {
	/// Kinetis MDM-AP Control register
	#[derive(Copy, Clone, Default, PartialEq, Eq)]
	pub struct MdmControl(u32);
	impl Debug;
	pub core_hold_reset, set_core_hold_reset: 4;
	pub system_reset_request, set_system_reset_request: 3;
	pub debug_request, set_debug_request: 2;
	pub debug_disable, set_debug_disable: 1;
	pub fmeip, set_fmeip: 0;
}

/// `From` conversions between register wrappers and their raw words
macro_rules! raw_conversions {
	($($register:ident),*) => {
		$(
			impl From<u32> for $register
			{
				fn from(raw: u32) -> Self
				{
					Self(raw)
				}
			}

			impl From<$register> for u32
			{
				fn from(register: $register) -> Self
				{
					register.0
				}
			}
		)*
	};
}

pub(crate) use raw_conversions;

raw_conversions!(Abort, CtrlStat, Select, Csw, MdmStatus, MdmControl);

/// Word-level access to a target's memory bus through a MEM-AP
pub trait AccessPort
{
	/// Re-establish the link after a FAULT or lost framing, clearing the debug port's sticky errors
	fn reconnect(&mut self) -> Result<()>;
	fn read_word(&mut self, address: u32) -> Result<u32>;
	fn write_word(&mut self, address: u32, value: u32) -> Result<()>;
	fn write_block(&mut self, address: u32, words: &[u32]) -> Result<()>;
	fn read_block(&mut self, address: u32, count: usize) -> Result<Vec<u32>>;
	/// Raw status (CSW) word of the access port
	fn status(&mut self) -> Result<u32>;
	/// Identification register (IDR) of the access port
	fn idcode(&mut self) -> Result<u32>;
}

/// Access to the Kinetis MDM-AP, which owns device security, mass erase and reset holds
pub trait MdmAccess
{
	fn mdm_status(&mut self) -> Result<u32>;
	fn mdm_control(&mut self) -> Result<u32>;
	fn set_mdm_control(&mut self, value: u32) -> Result<()>;
	fn mdm_idcode(&mut self) -> Result<u32>;
}

/// The SW-DP of a connected target
pub struct DebugPort<L>
{
	wire: SwdWire<L>,
	/// IDCODE read out when the link was brought up
	idcode: u32,
	/// Last value written to SELECT, so AP bank switches only go out when they change
	select: Option<Select>,
	power_up: PollPolicy,
}

impl<L: BitLink> DebugPort<L>
{
	/// Bring up the SWD link: switch the port to SWD, read IDCODE, clear sticky errors and
	/// power up the debug and system domains
	pub fn connect(link: L, power_up: PollPolicy) -> Result<Self>
	{
		let mut wire = SwdWire::new(link);
		wire.jtag_to_swd()?;
		let idcode = wire.read_cmd(Port::Debug, DP_IDCODE)?;
		info!("Found SW-DP with IDCODE 0x{:08x}", idcode);

		let mut dp = Self {
			wire,
			idcode,
			select: None,
			power_up,
		};
		dp.clear_errors()?;
		dp.power_up()?;
		Ok(dp)
	}

	/// Re-establish a link that answered FAULT or lost framing
	pub fn reconnect(&mut self) -> Result<()>
	{
		debug!("Reconnecting SWD link");
		self.select = None;
		self.wire.line_reset()?;
		self.idcode = self.wire.read_cmd(Port::Debug, DP_IDCODE)?;
		// The DP may still be latching the error that got us here, so don't let its ACK stop the clear
		self.wire
			.write_cmd_ignore_ack(Port::Debug, DP_ABORT, Abort::clear_errors().into())?;
		self.power_up()
	}

	pub fn idcode(&self) -> u32
	{
		self.idcode
	}

	pub fn wire(&mut self) -> &mut SwdWire<L>
	{
		&mut self.wire
	}

	pub fn clear_errors(&mut self) -> Result<()>
	{
		self.write_dp(DP_ABORT, Abort::clear_errors().into())
	}

	fn power_up(&mut self) -> Result<()>
	{
		let mut request = CtrlStat::default();
		request.set_cdbgpwrupreq(true);
		request.set_csyspwrupreq(true);
		self.write_dp(DP_CTRL_STAT, request.into())?;

		let policy = self.power_up;
		policy.poll("debug power-up acknowledge", || {
			let ctrl_stat = CtrlStat::from(self.read_dp(DP_CTRL_STAT)?);
			Ok((ctrl_stat.cdbgpwrupack() && ctrl_stat.csyspwrupack()).then_some(()))
		})
	}

	pub fn read_dp(&mut self, address: u8) -> Result<u32>
	{
		self.wire.read_cmd(Port::Debug, address)
	}

	pub fn write_dp(&mut self, address: u8, value: u32) -> Result<()>
	{
		self.wire.write_cmd(Port::Debug, address, value)
	}

	fn select(&mut self, ap: u8, address: u8) -> Result<()>
	{
		let mut select = Select::default();
		select.set_ap_sel(ap);
		select.set_ap_bank_sel(address >> 4);
		if self.select != Some(select) {
			self.write_dp(DP_SELECT, select.into())?;
			self.select = Some(select);
		}
		Ok(())
	}

	/// Read an AP register. AP reads are posted, so the value comes back through RDBUFF.
	pub fn read_ap(&mut self, ap: u8, address: u8) -> Result<u32>
	{
		self.read_ap_posted(ap, address)?;
		self.read_dp(DP_RDBUFF)
	}

	/// Issue an AP read, returning the result of the *previous* posted AP read
	fn read_ap_posted(&mut self, ap: u8, address: u8) -> Result<u32>
	{
		self.select(ap, address)?;
		self.wire.read_cmd(Port::Access, address)
	}

	pub fn write_ap(&mut self, ap: u8, address: u8, value: u32) -> Result<()>
	{
		self.select(ap, address)?;
		self.wire.write_cmd(Port::Access, address, value)
	}
}

/// A Kinetis target's access ports: the system MEM-AP and the MDM-AP, sharing one debug port
pub struct AdiPort<L>
{
	dp: DebugPort<L>,
	csw_configured: bool,
}

impl<L: BitLink> AdiPort<L>
{
	pub fn new(dp: DebugPort<L>) -> Self
	{
		Self {
			dp,
			csw_configured: false,
		}
	}

	pub fn debug_port(&mut self) -> &mut DebugPort<L>
	{
		&mut self.dp
	}

	fn configure(&mut self) -> Result<()>
	{
		if !self.csw_configured {
			self.dp.write_ap(MEM_AP, MEM_AP_CSW, Csw::word_increment().into())?;
			self.csw_configured = true;
		}
		Ok(())
	}

	/// Split a transfer of `count` words at `address` into runs that each stay inside one
	/// auto-increment window, returning (address, word count) pairs
	fn windows(address: u32, count: usize) -> Result<Vec<(u32, usize)>>
	{
		if address % 4 != 0 {
			return Err(Error::InvalidDataValue {
				what: "word-aligned memory address",
				value: address as u64,
			});
		}
		let mut runs = Vec::new();
		let mut done = 0;
		while done < count {
			let current = address.wrapping_add((done * 4) as u32);
			let room = ((MEM_AP_AUTOINC_WINDOW - (current % MEM_AP_AUTOINC_WINDOW)) / 4) as usize;
			let run = room.min(count - done);
			runs.push((current, run));
			done += run;
		}
		Ok(runs)
	}
}

impl<L: BitLink> AccessPort for AdiPort<L>
{
	fn reconnect(&mut self) -> Result<()>
	{
		self.csw_configured = false;
		self.dp.reconnect()
	}

	fn read_word(&mut self, address: u32) -> Result<u32>
	{
		self.configure()?;
		self.dp.write_ap(MEM_AP, MEM_AP_TAR, address)?;
		let value = self.dp.read_ap(MEM_AP, MEM_AP_DRW)?;
		debug!("mem[0x{:08x}] -> 0x{:08x}", address, value);
		Ok(value)
	}

	fn write_word(&mut self, address: u32, value: u32) -> Result<()>
	{
		self.configure()?;
		debug!("mem[0x{:08x}] <- 0x{:08x}", address, value);
		self.dp.write_ap(MEM_AP, MEM_AP_TAR, address)?;
		self.dp.write_ap(MEM_AP, MEM_AP_DRW, value)
	}

	fn write_block(&mut self, address: u32, words: &[u32]) -> Result<()>
	{
		self.configure()?;
		debug!("Writing {} words to 0x{:08x}", words.len(), address);
		let mut offset = 0;
		for (start, count) in Self::windows(address, words.len())? {
			self.dp.write_ap(MEM_AP, MEM_AP_TAR, start)?;
			for &word in &words[offset..offset + count] {
				self.dp.write_ap(MEM_AP, MEM_AP_DRW, word)?;
			}
			offset += count;
		}
		Ok(())
	}

	fn read_block(&mut self, address: u32, count: usize) -> Result<Vec<u32>>
	{
		self.configure()?;
		debug!("Reading {} words from 0x{:08x}", count, address);
		let mut words = Vec::with_capacity(count);
		for (start, run) in Self::windows(address, count)? {
			self.dp.write_ap(MEM_AP, MEM_AP_TAR, start)?;
			// Each DRW read hands back the previous one's data, so prime the pipeline
			// and collect the final word from RDBUFF
			self.dp.read_ap_posted(MEM_AP, MEM_AP_DRW)?;
			for _ in 1..run {
				words.push(self.dp.read_ap_posted(MEM_AP, MEM_AP_DRW)?);
			}
			words.push(self.dp.read_dp(DP_RDBUFF)?);
		}
		Ok(words)
	}

	fn status(&mut self) -> Result<u32>
	{
		self.dp.read_ap(MEM_AP, MEM_AP_CSW)
	}

	fn idcode(&mut self) -> Result<u32>
	{
		self.dp.read_ap(MEM_AP, AP_IDR)
	}
}

impl<L: BitLink> MdmAccess for AdiPort<L>
{
	fn mdm_status(&mut self) -> Result<u32>
	{
		self.dp.read_ap(MDM_AP, MDM_STATUS)
	}

	fn mdm_control(&mut self) -> Result<u32>
	{
		self.dp.read_ap(MDM_AP, MDM_CONTROL)
	}

	fn set_mdm_control(&mut self, value: u32) -> Result<()>
	{
		self.dp.write_ap(MDM_AP, MDM_CONTROL, value)
	}

	fn mdm_idcode(&mut self) -> Result<u32>
	{
		self.dp.read_ap(MDM_AP, AP_IDR)
	}
}
