// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

use std::io::{BufRead, Lines};

use ::ihex::{ReaderError, Record};
use log::{debug, warn};

use crate::error::{Error, Result};

/// Decode a single `:ccaaaatt[dd...]kk` line. Surrounding whitespace is ignored, anything else
/// that is off (stray characters, a byte count that disagrees with the payload, a bad checksum)
/// rejects the record.
pub fn parse_record(text: &str, line: usize) -> Result<Record>
{
	Record::from_record_string(text.trim()).map_err(|err| {
		let reason = match err {
			ReaderError::UnsupportedRecordType(record_type) => {
				return Error::UnsupportedRecordType {
					line,
					record_type,
				};
			},
			ReaderError::MissingStartCode => "line does not start with ':'",
			ReaderError::RecordTooShort => "record is too short",
			ReaderError::ChecksumMismatch(..) => "checksum mismatch",
			ReaderError::PayloadLengthMismatch => "byte count does not match record length",
			ReaderError::InvalidLengthForType => "payload length is wrong for the record type",
			_ => "record is not a sequence of hex digit pairs",
		};
		Error::MalformedRecord {
			line,
			reason,
		}
	})
}

/// A run of bytes at an absolute address, as produced by one data record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressedRun
{
	pub address: u32,
	pub data: Vec<u8>,
}

/// Lazily decodes Intel HEX text into [`AddressedRun`]s, one line at a time. The iterator ends
/// at the End Of File record without reading further, and stops for good after the first error.
pub struct IntelHexRuns<R>
{
	lines: Lines<R>,
	line: usize,
	segment_base: u32,
	linear_base: u32,
	finished: bool,
}

impl<R: BufRead> IntelHexRuns<R>
{
	pub fn new(reader: R) -> Self
	{
		Self {
			lines: reader.lines(),
			line: 0,
			segment_base: 0,
			linear_base: 0,
			finished: false,
		}
	}

	fn next_run(&mut self) -> Result<Option<AddressedRun>>
	{
		loop {
			let Some(text) = self.lines.next() else {
				warn!("Intel HEX input ended without an End Of File record");
				return Ok(None);
			};
			self.line += 1;
			let text = text.map_err(|err| Error::io(err, "read a line", "Intel HEX input"))?;
			if text.trim().is_empty() {
				continue;
			}

			match parse_record(&text, self.line)? {
				Record::Data {
					offset,
					value,
				} => {
					let address = (self.linear_base << 16)
						.wrapping_add(self.segment_base * 16)
						.wrapping_add(offset as u32);
					return Ok(Some(AddressedRun {
						address,
						data: value,
					}));
				},
				Record::EndOfFile => return Ok(None),
				Record::ExtendedSegmentAddress(segment) => self.segment_base = segment as u32,
				Record::ExtendedLinearAddress(upper) => self.linear_base = upper as u32,
				// CS:IP and EIP entry points are of no use when loading a Cortex-M image
				Record::StartSegmentAddress {
					..
				} |
				Record::StartLinearAddress(_) => debug!("Ignoring start address record on line {}", self.line),
			}
		}
	}
}

impl<R: BufRead> Iterator for IntelHexRuns<R>
{
	type Item = Result<AddressedRun>;

	fn next(&mut self) -> Option<Self::Item>
	{
		if self.finished {
			return None;
		}
		let result = self.next_run();
		if !matches!(result, Ok(Some(_))) {
			self.finished = true;
		}
		result.transpose()
	}
}
