// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

//! Module for error handling code.

use std::io;

use thiserror::Error;

use crate::flash_api::AgentStatus;
use crate::swd::{AckError, Request};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error
{
	#[error("Malformed Intel HEX record on line {line}: {reason}")]
	MalformedRecord
	{
		/// 1-based line number within the HEX file
		line: usize,
		reason: &'static str,
	},

	#[error("Unsupported Intel HEX record type 0x{record_type:02x} on line {line}")]
	UnsupportedRecordType
	{
		line: usize, record_type: u8
	},

	#[error("Value 0x{value:x} is out of range for {what}")]
	InvalidDataValue
	{
		/// What the value was destined for (e.g.: `"flash API block length"`)
		what: &'static str,
		value: u64,
	},

	#[error("Target did not acknowledge {request}: {ack}")]
	WireAck
	{
		request: Request, ack: AckError
	},

	#[error("Parity mismatch on data read by {request} (value 0x{value:08x})")]
	Parity
	{
		request: Request, value: u32
	},

	#[error("Flash agent reported an error: {status}")]
	FlashApiError
	{
		status: AgentStatus
	},

	#[error("Timed out after {attempts} attempts waiting for {operation}")]
	Timeout
	{
		/// The condition being polled for (e.g.: `"core register transfer"`)
		operation: &'static str,
		attempts: u32,
	},

	#[error("Device is secured and could not be unsecured (MDM-AP status 0x{mdm_status:08x})")]
	SecureDeviceUnrecoverable
	{
		mdm_status: u32
	},

	#[error("Core register index {0} is out of range (0-15)")]
	InvalidRegister(u8),

	#[error("Symbol '{0}' not found in firmware map")]
	MissingSymbol(String),

	#[error("I/O error when attempting to {operation} for {context}")]
	Io
	{
		#[source]
		source: io::Error,

		/// The I/O operation that failed (e.g. `"write a GPIO value"`).
		operation: &'static str,

		/// What the operation was being performed for (e.g.: `"gpio 23"`).
		context: String,
	},
}

impl Error
{
	pub(crate) fn io(source: io::Error, operation: &'static str, context: impl Into<String>) -> Self
	{
		Self::Io {
			source,
			operation,
			context: context.into(),
		}
	}

	/// Whether repeating the failed transaction unchanged has a chance of succeeding.
	/// Only WAIT acknowledgements qualify; the wire engine never retries on its own.
	pub fn is_retryable(&self) -> bool
	{
		matches!(
			self,
			Self::WireAck {
				ack: AckError::Wait,
				..
			}
		)
	}

	/// Whether the debug link needs a line reset and reconnect before it can be used again.
	pub fn requires_reconnect(&self) -> bool
	{
		matches!(
			self,
			Self::WireAck {
				ack: AckError::Fault | AckError::NotPresent | AckError::Protocol(_),
				..
			} | Self::Parity { .. }
		)
	}
}

#[macro_export]
macro_rules! log_and_return
{
	($err:expr) => {
		let err = $err;
		log::error!("{}", err);
		return Err(err);
	};
}
