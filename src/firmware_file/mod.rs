// SPDX-License-Identifier: MIT OR Apache-2.0
// SPDX-FileCopyrightText: 2025 kinetis-swd contributors

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

pub mod ihex;

pub use self::ihex::{AddressedRun, IntelHexRuns, parse_record};

/// A contiguous, size-capped chunk of an image, ready to be written in one go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock
{
	pub address: u32,
	pub data: Vec<u8>,
}

impl MemoryBlock
{
	/// The address one past the last byte of the block
	pub fn end_address(&self) -> u32
	{
		self.address.wrapping_add(self.data.len() as u32)
	}
}

/// Merge address-contiguous runs into blocks of at most `max_len` bytes. A block never spans a gap
/// in the address space; a run that would take a block past `max_len` is split so the block is filled
/// exactly and the remainder starts the next one.
pub fn aggregate_blocks<I>(runs: I, max_len: usize) -> Result<Vec<MemoryBlock>>
where
	I: IntoIterator<Item = AddressedRun>,
{
	if max_len == 0 {
		return Err(Error::InvalidDataValue {
			what: "block length cap",
			value: 0,
		});
	}

	let mut blocks: Vec<MemoryBlock> = Vec::new();
	for run in runs {
		let mut address = run.address;
		let mut data = &run.data[..];
		while !data.is_empty() {
			let taken = match blocks.last_mut() {
				Some(block) if block.end_address() == address && block.data.len() < max_len => {
					let taken = (max_len - block.data.len()).min(data.len());
					block.data.extend_from_slice(&data[..taken]);
					taken
				},
				_ => {
					let taken = max_len.min(data.len());
					blocks.push(MemoryBlock {
						address,
						data: data[..taken].to_vec(),
					});
					taken
				},
			};
			address = address.wrapping_add(taken as u32);
			data = &data[taken..];
		}
	}
	Ok(blocks)
}

/// A fully decoded Intel HEX image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage
{
	runs: Vec<AddressedRun>,
}

impl FirmwareImage
{
	/// Read and check an entire Intel HEX file, so a bad image is caught before touching any device
	pub fn from_path(path: &Path) -> Result<Self>
	{
		let file = File::open(path).map_err(|err| Error::io(err, "open", path.display().to_string()))?;
		let image = Self::from_reader(BufReader::new(file))?;
		debug!(
			"Read {} bytes in {} records from {}",
			image.len(),
			image.runs.len(),
			path.display()
		);
		Ok(image)
	}

	pub fn from_reader<R: BufRead>(reader: R) -> Result<Self>
	{
		Ok(Self {
			runs: IntelHexRuns::new(reader).collect::<Result<_>>()?,
		})
	}

	pub fn runs(&self) -> &[AddressedRun]
	{
		&self.runs
	}

	/// Total number of data bytes in the image
	pub fn len(&self) -> usize
	{
		self.runs.iter().map(|run| run.data.len()).sum()
	}

	pub fn is_empty(&self) -> bool
	{
		self.len() == 0
	}

	pub fn blocks(&self, max_len: usize) -> Result<Vec<MemoryBlock>>
	{
		aggregate_blocks(self.runs.iter().cloned(), max_len)
	}
}
