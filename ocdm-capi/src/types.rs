// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

use ocdm::{
    EncryptionPattern, EncryptionScheme, Error, MediaProperties, MediaType, SampleInfo, SubSample,
};

use crate::bytes;

/// C layout of a sample description, borrowed for the duration of a call.
///
/// `scheme` carries an `EncryptionScheme` value (`0` clear, `1` cenc, `2` cbc1,
/// `3` cens, `4` cbcs). Null pointers are allowed together with a zero length.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct OpenCDMSampleInfo {
    pub scheme: u32,
    pub pattern: EncryptionPattern,
    pub iv: *const u8,
    pub iv_length: u8,
    pub key_id: *const u8,
    pub key_id_length: u8,
    pub subsample_count: u32,
    pub subsamples: *const SubSample,
}

impl OpenCDMSampleInfo {
    /// Copies the description into an owned [`SampleInfo`].
    ///
    /// # Safety
    ///
    /// Every non-null pointer must be valid for its length
    /// (`subsample_count` elements for `subsamples`).
    pub unsafe fn to_sample_info(&self) -> ocdm::Result<SampleInfo> {
        let scheme = EncryptionScheme::from_raw(self.scheme).ok_or(Error::InvalidArg)?;
        let subsamples = if self.subsample_count == 0 {
            Vec::new()
        } else if self.subsamples.is_null() {
            return Err(Error::InvalidArg);
        } else {
            // SAFETY: non-null and valid for `subsample_count` entries per the caller.
            unsafe { std::slice::from_raw_parts(self.subsamples, self.subsample_count as usize) }
                .to_vec()
        };
        // SAFETY: forwarded from the caller.
        let (iv, key_id) = unsafe {
            (
                bytes(self.iv, self.iv_length as usize)?,
                bytes(self.key_id, self.key_id_length as usize)?,
            )
        };
        Ok(SampleInfo {
            scheme,
            pattern: self.pattern,
            iv: iv.to_vec(),
            key_id: key_id.to_vec(),
            subsamples,
        })
    }
}

/// C layout of the media sizing hint. `media_type` is `0` unknown, `1` video,
/// `2` audio, `3` data.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenCDMMediaProperties {
    pub height: u32,
    pub width: u32,
    pub media_type: u32,
}

impl From<OpenCDMMediaProperties> for MediaProperties {
    fn from(value: OpenCDMMediaProperties) -> Self {
        Self {
            height: value.height,
            width: value.width,
            media_type: MediaType::from_raw(value.media_type),
        }
    }
}

impl From<MediaProperties> for OpenCDMMediaProperties {
    fn from(value: MediaProperties) -> Self {
        Self {
            height: value.height,
            width: value.width,
            media_type: value.media_type as u32,
        }
    }
}
