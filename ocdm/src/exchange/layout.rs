// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Binary layout of a decrypt channel's shared memory.
//!
//! ```text
//! +------------------+ 0
//! | ControlBlock     |  magic, handshake state, capacity, status, request header
//! +------------------+ DATA_OFFSET
//! | data region      |  `capacity` bytes of ciphertext, then plaintext
//! +------------------+
//! ```

use std::mem::size_of;
use std::sync::atomic::AtomicU32;

use crate::{
    EncryptionPattern, EncryptionScheme, Error, MediaProperties, MediaType, Result, SampleInfo,
    SubSample,
};

/// Marks an initialized control block ("OCDM").
pub(crate) const CHANNEL_MAGIC: u32 = 0x4f43_444d;

/// Longest IV the control block can carry.
pub const MAX_IV_LENGTH: usize = 16;

/// Longest key ID the control block can carry.
pub const MAX_KEY_ID_LENGTH: usize = 16;

/// Most sub-sample entries one request can carry.
pub const MAX_SUBSAMPLES: usize = 256;

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub(crate) struct RawSubSample {
    pub clear_bytes: u32,
    pub encrypted_bytes: u32,
}

/// Per-request metadata, written by the client while it owns the channel.
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct RequestHeader {
    pub data_length: u32,
    pub scheme: u32,
    pub pattern_encrypted: u32,
    pub pattern_clear: u32,
    pub init_with_last_15: u32,
    pub has_media_properties: u32,
    pub media_height: u32,
    pub media_width: u32,
    pub media_type: u32,
    pub iv_length: u32,
    pub key_id_length: u32,
    pub subsample_count: u32,
    pub iv: [u8; MAX_IV_LENGTH],
    pub key_id: [u8; MAX_KEY_ID_LENGTH],
    pub subsamples: [RawSubSample; MAX_SUBSAMPLES],
}

#[repr(C)]
pub(crate) struct ControlBlock {
    pub magic: u32,
    pub state: AtomicU32,
    pub capacity: u32,
    pub status: u32,
    pub header: RequestHeader,
}

/// Start of the data region, cache-line aligned.
pub(crate) const DATA_OFFSET: usize = size_of::<ControlBlock>().div_ceil(64) * 64;

/// Bytes needed for a channel with `capacity` bytes of data.
pub(crate) fn region_size(capacity: usize) -> usize {
    DATA_OFFSET + capacity
}

impl RequestHeader {
    /// Encodes a request. `None` sample info means "no encryption metadata".
    pub fn new(
        data_length: usize,
        info: Option<&SampleInfo>,
        init_with_last_15: bool,
        properties: Option<&MediaProperties>,
    ) -> Result<Self> {
        let mut header = RequestHeader {
            data_length: u32::try_from(data_length).map_err(|_| Error::InvalidArg)?,
            scheme: EncryptionScheme::Clear as u32,
            pattern_encrypted: 0,
            pattern_clear: 0,
            init_with_last_15: init_with_last_15 as u32,
            has_media_properties: 0,
            media_height: 0,
            media_width: 0,
            media_type: MediaType::Unknown as u32,
            iv_length: 0,
            key_id_length: 0,
            subsample_count: 0,
            iv: [0; MAX_IV_LENGTH],
            key_id: [0; MAX_KEY_ID_LENGTH],
            subsamples: [RawSubSample::default(); MAX_SUBSAMPLES],
        };

        if let Some(info) = info {
            if info.iv.len() > MAX_IV_LENGTH
                || info.key_id.len() > MAX_KEY_ID_LENGTH
                || info.subsamples.len() > MAX_SUBSAMPLES
            {
                return Err(Error::InvalidArg);
            }
            header.scheme = info.scheme as u32;
            header.pattern_encrypted = info.pattern.encrypted_blocks;
            header.pattern_clear = info.pattern.clear_blocks;
            header.iv_length = info.iv.len() as u32;
            header.iv[..info.iv.len()].copy_from_slice(&info.iv);
            header.key_id_length = info.key_id.len() as u32;
            header.key_id[..info.key_id.len()].copy_from_slice(&info.key_id);
            header.subsample_count = info.subsamples.len() as u32;
            for (slot, entry) in header.subsamples.iter_mut().zip(&info.subsamples) {
                *slot = RawSubSample {
                    clear_bytes: entry.clear_bytes as u32,
                    encrypted_bytes: entry.encrypted_bytes,
                };
            }
        }

        if let Some(properties) = properties {
            header.has_media_properties = 1;
            header.media_height = properties.height;
            header.media_width = properties.width;
            header.media_type = properties.media_type as u32;
        }

        Ok(header)
    }

    /// Decodes the sample description. Out-of-range lengths are clamped.
    pub fn sample_info(&self) -> SampleInfo {
        let iv_length = (self.iv_length as usize).min(MAX_IV_LENGTH);
        let key_id_length = (self.key_id_length as usize).min(MAX_KEY_ID_LENGTH);
        let subsample_count = (self.subsample_count as usize).min(MAX_SUBSAMPLES);
        SampleInfo {
            scheme: EncryptionScheme::from_raw(self.scheme).unwrap_or(EncryptionScheme::Clear),
            pattern: EncryptionPattern::new(self.pattern_encrypted, self.pattern_clear),
            iv: self.iv[..iv_length].to_vec(),
            key_id: self.key_id[..key_id_length].to_vec(),
            subsamples: self.subsamples[..subsample_count]
                .iter()
                .map(|raw| SubSample::new(raw.clear_bytes as u16, raw.encrypted_bytes))
                .collect(),
        }
    }

    pub fn media_properties(&self) -> Option<MediaProperties> {
        (self.has_media_properties != 0).then(|| MediaProperties {
            height: self.media_height,
            width: self.media_width,
            media_type: MediaType::from_raw(self.media_type),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_region_is_aligned() {
        assert_eq!(DATA_OFFSET % 64, 0);
        assert!(DATA_OFFSET >= size_of::<ControlBlock>());
        assert_eq!(region_size(100), DATA_OFFSET + 100);
    }

    #[test]
    fn header_carries_the_sample_description() {
        let info = SampleInfo::cenc(&[7; 8], &[1; 16])
            .with_scheme(EncryptionScheme::AesCbcCbcs, EncryptionPattern::new(1, 9))
            .with_subsamples(vec![SubSample::new(5, 10)]);
        let properties = MediaProperties {
            height: 720,
            width: 1280,
            media_type: MediaType::Video,
        };
        let header = RequestHeader::new(15, Some(&info), true, Some(&properties)).unwrap();
        assert_eq!(header.sample_info(), info);
        assert_eq!(header.media_properties(), Some(properties));
        assert_eq!(header.init_with_last_15, 1);
    }

    #[test]
    fn missing_sample_info_is_a_clear_request() {
        let header = RequestHeader::new(4, None, false, None).unwrap();
        let info = header.sample_info();
        assert_eq!(info.scheme, EncryptionScheme::Clear);
        assert!(info.is_clear_passthrough());
        assert_eq!(header.media_properties(), None);
    }

    #[test]
    fn oversized_fields_are_rejected() {
        let info = SampleInfo::cenc(&[0; 17], &[]);
        assert!(matches!(
            RequestHeader::new(1, Some(&info), false, None),
            Err(Error::InvalidArg)
        ));
    }
}
