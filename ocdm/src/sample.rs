// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Sample and media description types.
//!
//! These are the data carriers handed to [`crate::OpenCdmSession::decrypt`]:
//! the encryption scheme and pattern of one sample, its IV, key ID and
//! sub-sample map, plus an optional [`MediaProperties`] sizing hint.

use std::fmt;

use crate::{Error, Result};

/// Encryption scheme of a sample (ISO/IEC 23001-7 protection schemes).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EncryptionScheme {
    /// Not encrypted.
    Clear = 0,
    /// AES-CTR, full sample encryption (`cenc`).
    #[default]
    AesCtrCenc = 1,
    /// AES-CBC, full sample encryption (`cbc1`).
    AesCbcCbc1 = 2,
    /// AES-CTR, pattern encryption (`cens`).
    AesCtrCens = 3,
    /// AES-CBC, pattern encryption (`cbcs`).
    AesCbcCbcs = 4,
}

impl EncryptionScheme {
    /// Maps a four-character `cipher-mode` code to a scheme.
    ///
    /// Returns `None` for anything that is not one of `cenc`, `cbc1`, `cens`
    /// or `cbcs`.
    pub fn from_cipher_mode(mode: &str) -> Option<Self> {
        match mode {
            "cenc" => Some(Self::AesCtrCenc),
            "cbc1" => Some(Self::AesCbcCbc1),
            "cens" => Some(Self::AesCtrCens),
            "cbcs" => Some(Self::AesCbcCbcs),
            _ => None,
        }
    }

    /// Converts the raw C/shared-memory value back into a scheme.
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Clear),
            1 => Some(Self::AesCtrCenc),
            2 => Some(Self::AesCbcCbc1),
            3 => Some(Self::AesCtrCens),
            4 => Some(Self::AesCbcCbcs),
            _ => None,
        }
    }

    /// Whether the [`EncryptionPattern`] is meaningful for this scheme.
    pub fn is_patterned(self) -> bool {
        matches!(self, Self::AesCtrCens | Self::AesCbcCbcs)
    }
}

/// Repeating (encrypted, clear) 16-byte block pattern for `cens`/`cbcs`.
///
/// `(0, 0)` means "not patterned".
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EncryptionPattern {
    pub encrypted_blocks: u32,
    pub clear_blocks: u32,
}

impl EncryptionPattern {
    pub const fn new(encrypted_blocks: u32, clear_blocks: u32) -> Self {
        Self {
            encrypted_blocks,
            clear_blocks,
        }
    }
}

/// One alternating clear/encrypted segment of a sample.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubSample {
    pub clear_bytes: u16,
    pub encrypted_bytes: u32,
}

impl SubSample {
    pub const fn new(clear_bytes: u16, encrypted_bytes: u32) -> Self {
        Self {
            clear_bytes,
            encrypted_bytes,
        }
    }

    /// Total bytes covered by this segment.
    pub fn len(&self) -> usize {
        self.clear_bytes as usize + self.encrypted_bytes as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Binary content key identifier.
///
/// Comparison through [`KeyId::matches`] accepts both byte orders of a
/// 16-byte GUID, since some DRM engines report key IDs in little-endian GUID
/// form while the container carries them big-endian.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct KeyId(Vec<u8>);

impl KeyId {
    /// Length of a GUID shaped key ID.
    pub const GUID_LENGTH: usize = 16;

    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the key ID with the first three GUID fields byte-swapped.
    ///
    /// Only 16-byte IDs have a GUID form; anything else is returned as is.
    pub fn swapped_guid(&self) -> KeyId {
        let mut bytes = self.0.clone();
        if bytes.len() == Self::GUID_LENGTH {
            bytes[0..4].reverse();
            bytes[4..6].reverse();
            bytes[6..8].reverse();
        }
        KeyId(bytes)
    }

    /// Byte-wise match, also trying the other GUID byte order.
    ///
    /// # Examples
    ///
    /// ```
    /// use ocdm::KeyId;
    ///
    /// let be = KeyId::new(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]);
    /// let le = [3, 2, 1, 0, 5, 4, 7, 6, 8, 9, 10, 11, 12, 13, 14, 15];
    /// assert!(be.matches(&le));
    /// assert!(!be.matches(&le[..8]));
    /// ```
    pub fn matches(&self, other: &[u8]) -> bool {
        if self.0 == other {
            return true;
        }
        self.0.len() == Self::GUID_LENGTH
            && other.len() == Self::GUID_LENGTH
            && self.swapped_guid().0 == other
    }
}

impl From<&[u8]> for KeyId {
    fn from(value: &[u8]) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyId({self})")
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(bytes) = <[u8; 16]>::try_from(self.0.as_slice()) {
            return write!(f, "{}", uuid::Uuid::from_bytes(bytes));
        }
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Status of one key within a session, as reported by the DRM engine.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyStatus {
    Usable = 0,
    Expired = 1,
    Released = 2,
    OutputRestricted = 3,
    OutputRestrictedHdcp22 = 4,
    OutputDownscaled = 5,
    StatusPending = 6,
    InternalError = 7,
    HwError = 8,
}

impl KeyStatus {
    pub fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Usable),
            1 => Some(Self::Expired),
            2 => Some(Self::Released),
            3 => Some(Self::OutputRestricted),
            4 => Some(Self::OutputRestrictedHdcp22),
            5 => Some(Self::OutputDownscaled),
            6 => Some(Self::StatusPending),
            7 => Some(Self::InternalError),
            8 => Some(Self::HwError),
            _ => None,
        }
    }

    pub fn is_pending(self) -> bool {
        self == Self::StatusPending
    }

    /// Whether this status denotes a failure of the key rather than a policy state.
    pub fn is_error(self) -> bool {
        matches!(self, Self::InternalError | Self::HwError)
    }
}

/// Kind of elementary stream a sample belongs to.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MediaType {
    #[default]
    Unknown = 0,
    Video = 1,
    Audio = 2,
    Data = 3,
}

impl MediaType {
    pub fn from_raw(value: u32) -> Self {
        match value {
            1 => Self::Video,
            2 => Self::Audio,
            3 => Self::Data,
            _ => Self::Unknown,
        }
    }
}

/// Out-of-band hint helping the decrypt back-end size its buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaProperties {
    pub height: u32,
    pub width: u32,
    pub media_type: MediaType,
}

/// Everything the decryptor needs to know about one sample.
///
/// An empty `iv` means an all-zero IV. An empty `subsamples` list means the
/// whole sample is one encrypted region; when `iv`, `key_id` and
/// `subsamples` are all empty the sample is treated as fully clear.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SampleInfo {
    pub scheme: EncryptionScheme,
    pub pattern: EncryptionPattern,
    pub iv: Vec<u8>,
    pub key_id: Vec<u8>,
    pub subsamples: Vec<SubSample>,
}

impl SampleInfo {
    /// Full-sample AES-CTR description, the layout of the legacy decrypt call.
    pub fn cenc(iv: &[u8], key_id: &[u8]) -> Self {
        Self {
            scheme: EncryptionScheme::AesCtrCenc,
            pattern: EncryptionPattern::default(),
            iv: iv.to_vec(),
            key_id: key_id.to_vec(),
            subsamples: Vec::new(),
        }
    }

    pub fn with_scheme(mut self, scheme: EncryptionScheme, pattern: EncryptionPattern) -> Self {
        self.scheme = scheme;
        self.pattern = pattern;
        self
    }

    pub fn with_subsamples(mut self, subsamples: Vec<SubSample>) -> Self {
        self.subsamples = subsamples;
        self
    }

    /// True for the "fully clear sample, SVP pass-through" case.
    pub fn is_clear_passthrough(&self) -> bool {
        self.iv.is_empty() && self.key_id.is_empty() && self.subsamples.is_empty()
    }

    /// Sum of all sub-sample encrypted byte counts.
    pub fn encrypted_len(&self) -> usize {
        self.subsamples
            .iter()
            .map(|s| s.encrypted_bytes as usize)
            .sum()
    }

    /// Checks that the sub-sample map covers exactly `sample_len` bytes.
    ///
    /// An empty map always passes.
    pub fn validate(&self, sample_len: usize) -> Result<()> {
        if self.subsamples.is_empty() {
            return Ok(());
        }
        let covered: usize = self.subsamples.iter().map(SubSample::len).sum();
        if covered != sample_len {
            return Err(Error::Other(format!(
                "Sub-sample map covers {covered} bytes, sample has {sample_len}."
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_modes_map_to_schemes() {
        assert_eq!(
            EncryptionScheme::from_cipher_mode("cbcs"),
            Some(EncryptionScheme::AesCbcCbcs)
        );
        assert_eq!(
            EncryptionScheme::from_cipher_mode("cenc"),
            Some(EncryptionScheme::AesCtrCenc)
        );
        assert_eq!(EncryptionScheme::from_cipher_mode("xyz1"), None);
        assert!(EncryptionScheme::AesCtrCens.is_patterned());
        assert!(!EncryptionScheme::AesCbcCbc1.is_patterned());
    }

    #[test]
    fn key_ids_only_swap_when_guid_sized() {
        let short = KeyId::new(&[1, 2, 3]);
        assert_eq!(short.swapped_guid(), short);
        assert!(short.matches(&[1, 2, 3]));
        assert!(!short.matches(&[3, 2, 1]));
    }

    #[test]
    fn key_id_displays_as_uuid_when_guid_sized() {
        let kid = KeyId::new(&[0xab; 16]);
        assert_eq!(kid.to_string(), "abababab-abab-abab-abab-abababababab");
        assert_eq!(KeyId::new(&[0x0f, 0xa0]).to_string(), "0fa0");
    }

    #[test]
    fn validate_requires_exact_coverage() {
        let info = SampleInfo::cenc(&[0; 16], &[1; 16])
            .with_subsamples(vec![SubSample::new(4, 12), SubSample::new(2, 0)]);
        assert!(info.validate(18).is_ok());
        assert!(info.validate(17).is_err());
        assert_eq!(info.encrypted_len(), 12);
    }

    #[test]
    fn clear_passthrough_needs_no_metadata_at_all() {
        assert!(SampleInfo::default().is_clear_passthrough());
        assert!(!SampleInfo::cenc(&[], &[1]).is_clear_passthrough());
    }

    #[test]
    fn raw_status_values_are_stable() {
        assert_eq!(KeyStatus::from_raw(6), Some(KeyStatus::StatusPending));
        assert_eq!(KeyStatus::Usable as u32, 0);
        assert_eq!(KeyStatus::from_raw(9), None);
        assert!(KeyStatus::HwError.is_error());
    }
}
