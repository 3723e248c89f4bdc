// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Sub-sample scatter/gather.
//!
//! Media pipelines describe a partially encrypted sample with a packed
//! sub-sample map: `count` entries of a big-endian `u16` clear-byte count
//! followed by a big-endian `u32` encrypted-byte count. The decryptor wants
//! the encrypted bytes as one contiguous region, so decrypting such a sample
//! takes three passes over the map:
//!
//! 1. **sum**: add up the encrypted byte counts,
//! 2. **gather**: copy every encrypted region into one scratch buffer,
//! 3. **scatter**: after decryption, copy the scratch buffer back into the
//!    positions the regions were read from.
//!
//! Every pass starts by rewinding the [`SubsampleReader`] to position 0.

use crate::{Error, Result, SubSample};

/// Size of one packed sub-sample entry.
pub const SUBSAMPLE_ENTRY_SIZE: usize = 6;

/// Cursor over a packed big-endian sub-sample map.
#[derive(Debug, Clone)]
pub struct SubsampleReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SubsampleReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current byte offset.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Moves the cursor; fails if `pos` lies past the end of the map.
    pub fn set_pos(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::InvalidDecryptBuffer);
        }
        self.pos = pos;
        Ok(())
    }

    /// Number of whole entries the map holds.
    pub fn capacity(&self) -> usize {
        self.data.len() / SUBSAMPLE_ENTRY_SIZE
    }

    fn read_u16_be(&mut self) -> Option<u16> {
        let bytes = self.data.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_u32_be(&mut self) -> Option<u32> {
        let bytes = self.data.get(self.pos..self.pos + 4)?;
        self.pos += 4;
        Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads the next entry. A truncated map is an invalid decrypt buffer.
    pub fn next_entry(&mut self) -> Result<SubSample> {
        let clear_bytes = self.read_u16_be().ok_or(Error::InvalidDecryptBuffer)?;
        let encrypted_bytes = self.read_u32_be().ok_or(Error::InvalidDecryptBuffer)?;
        Ok(SubSample {
            clear_bytes,
            encrypted_bytes,
        })
    }
}

/// Packs sub-samples into the big-endian wire layout read by [`SubsampleReader`].
pub fn encode_subsamples(subsamples: &[SubSample]) -> Vec<u8> {
    let mut out = Vec::with_capacity(subsamples.len() * SUBSAMPLE_ENTRY_SIZE);
    for entry in subsamples {
        out.extend_from_slice(&entry.clear_bytes.to_be_bytes());
        out.extend_from_slice(&entry.encrypted_bytes.to_be_bytes());
    }
    out
}

/// Pass 1: total encrypted bytes over the first `count` entries.
pub fn encrypted_total(reader: &mut SubsampleReader<'_>, count: usize) -> Result<usize> {
    reader.set_pos(0)?;
    let mut total = 0usize;
    for _ in 0..count {
        total += reader.next_entry()?.encrypted_bytes as usize;
    }
    Ok(total)
}

/// A sample's encrypted regions consolidated into one buffer.
#[derive(Debug)]
pub struct GatheredSample {
    /// Encrypted bytes followed by `reserved` bytes of zero padding.
    pub data: Vec<u8>,
    /// Number of meaningful bytes at the start of `data`.
    pub encrypted_len: usize,
    /// One `(0, n)` entry per source region, so region boundaries survive the
    /// move into a contiguous buffer.
    pub regions: Vec<SubSample>,
}

impl GatheredSample {
    /// The encrypted payload without the reserved padding.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.encrypted_len]
    }

    /// The payload, for in-place decryption. The padding is the token space
    /// the decrypt channel already reserves after every sample.
    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.encrypted_len]
    }
}

/// Passes 1 and 2: sums the map, then copies every encrypted region of
/// `sample` into a scratch buffer padded with `reserved` trailing bytes.
///
/// Fails with [`Error::InvalidDecryptBuffer`] when the map is truncated or
/// describes bytes beyond the end of `sample`.
pub fn gather(
    sample: &[u8],
    reader: &mut SubsampleReader<'_>,
    count: usize,
    reserved: usize,
) -> Result<GatheredSample> {
    let total = encrypted_total(reader, count)?;

    let mut data = Vec::with_capacity(total + reserved);
    let mut regions = Vec::with_capacity(count);
    let mut index = 0usize;

    reader.set_pos(0)?;
    for _ in 0..count {
        let entry = reader.next_entry()?;
        let start = index + entry.clear_bytes as usize;
        let end = start + entry.encrypted_bytes as usize;
        let region = sample.get(start..end).ok_or(Error::InvalidDecryptBuffer)?;
        data.extend_from_slice(region);
        regions.push(SubSample::new(0, entry.encrypted_bytes));
        index = end;
    }
    reader.set_pos(0)?;

    data.resize(total + reserved, 0);
    Ok(GatheredSample {
        data,
        encrypted_len: total,
        regions,
    })
}

/// Pass 3: writes `decrypted` back into the encrypted regions of `sample`.
///
/// Clear regions are left untouched. `decrypted` must hold at least the
/// summed encrypted length; trailing bytes (the reserved padding) are ignored.
pub fn scatter(
    decrypted: &[u8],
    reader: &mut SubsampleReader<'_>,
    count: usize,
    sample: &mut [u8],
) -> Result<()> {
    reader.set_pos(0)?;
    let mut index = 0usize;
    let mut total = 0usize;
    for _ in 0..count {
        let entry = reader.next_entry()?;
        let start = total + entry.clear_bytes as usize;
        let end = start + entry.encrypted_bytes as usize;
        let source = decrypted
            .get(index..index + entry.encrypted_bytes as usize)
            .ok_or(Error::InvalidDecryptBuffer)?;
        sample
            .get_mut(start..end)
            .ok_or(Error::InvalidDecryptBuffer)?
            .copy_from_slice(source);
        index += entry.encrypted_bytes as usize;
        total = end;
    }
    reader.set_pos(0)
}
