// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

use std::thread;
use std::time::Duration;

use log::trace;

use crate::error::{Error, Result};

/// How long to keep polling a condition on the target before giving up with [`Error::Timeout`]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PollPolicy
{
	/// Number of times the condition is checked, at least once
	pub attempts: u32,
	/// Pause between checks
	pub interval: Duration,
}

impl PollPolicy
{
	pub const fn new(attempts: u32, interval: Duration) -> Self
	{
		Self {
			attempts,
			interval,
		}
	}

	/// Check `condition` until it yields a value, sleeping `interval` between checks.
	/// Errors from the condition itself end the poll immediately.
	pub fn poll<T, F>(&self, operation: &'static str, mut condition: F) -> Result<T>
	where
		F: FnMut() -> Result<Option<T>>,
	{
		let attempts = self.attempts.max(1);
		for attempt in 1..=attempts {
			if let Some(value) = condition()? {
				if attempt > 1 {
					trace!("{} satisfied after {} attempts", operation, attempt);
				}
				return Ok(value);
			}
			if attempt < attempts && !self.interval.is_zero() {
				thread::sleep(self.interval);
			}
		}
		Err(Error::Timeout {
			operation,
			attempts,
		})
	}
}

impl Default for PollPolicy
{
	fn default() -> Self
	{
		Self::new(100, Duration::from_millis(10))
	}
}
