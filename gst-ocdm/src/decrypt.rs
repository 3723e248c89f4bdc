// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

use gstreamer as gst;
use ocdm::exchange::MAX_SUBSAMPLES;
use ocdm::subsample::{SubsampleReader, gather, scatter};
use ocdm::{
    EncryptionPattern, EncryptionScheme, Error, MediaProperties, OpenCdmSession, Result,
    SampleInfo, SubSample,
};
use tracing::trace;

use crate::CAT;

/// Protection fields of one sample.
///
/// Built from the arguments of [`decrypt`] / [`decrypt_v2`], or read from a
/// `GstProtectionMeta` by [`Protection::from_structure`].
#[derive(Debug, Clone, Default)]
pub struct Protection {
    pub scheme: EncryptionScheme,
    pub pattern: EncryptionPattern,
    pub iv: Option<gst::Buffer>,
    pub key_id: Option<gst::Buffer>,
    /// Packed big-endian `(u16 clear, u32 encrypted)` entries.
    pub subsamples: Option<gst::Buffer>,
    pub subsample_count: u32,
    pub init_with_last_15: bool,
}

impl Protection {
    /// Reads the protection structure a demuxer attaches to an encrypted sample.
    ///
    /// Known fields: `cipher-mode` (`cenc`, `cbc1`, `cens`, `cbcs`, default
    /// `cenc`), `crypt_byte_block` and `skip_byte_block` (default 0), `iv`
    /// (falling back to `constant_iv`), `kid`, `subsample_count`,
    /// `subsamples` and `initWithLast15`.
    pub fn from_structure(info: &gst::StructureRef) -> Result<Self> {
        let scheme = match info.get::<&str>("cipher-mode") {
            Ok(mode) => EncryptionScheme::from_cipher_mode(mode).ok_or_else(|| {
                gst::error!(CAT, "Unsupported cipher mode {}", mode);
                Error::InvalidArg
            })?,
            Err(_) => EncryptionScheme::AesCtrCenc,
        };
        let pattern = EncryptionPattern::new(
            info.get::<u32>("crypt_byte_block").unwrap_or(0),
            info.get::<u32>("skip_byte_block").unwrap_or(0),
        );
        let init_with_last_15 = info
            .get::<bool>("initWithLast15")
            .or_else(|_| info.get::<u32>("initWithLast15").map(|flag| flag != 0))
            .unwrap_or(false);

        Ok(Self {
            scheme,
            pattern,
            iv: info
                .get::<gst::Buffer>("iv")
                .or_else(|_| info.get::<gst::Buffer>("constant_iv"))
                .ok(),
            key_id: info.get::<gst::Buffer>("kid").ok(),
            subsamples: info.get::<gst::Buffer>("subsamples").ok(),
            subsample_count: info.get::<u32>("subsample_count").unwrap_or(0),
            init_with_last_15,
        })
    }

    /// No IV, no key ID and no sub-sample map: the sample is clear.
    pub fn is_clear(&self) -> bool {
        self.iv.is_none() && self.key_id.is_none() && self.subsamples.is_none()
    }
}

fn map_failed(what: &str) -> Error {
    gst::error!(CAT, "Invalid buffer: failed to map {}", what);
    Error::InvalidDecryptBuffer
}

/// Decrypts an AES-CTR sample in place.
///
/// `subsamples` holds `subsample_count` packed entries; without it the whole
/// buffer is one encrypted region. With none of `subsamples`, `iv` and
/// `key_id` the sample is clear and only goes through the secure buffer
/// transform.
pub fn decrypt(
    session: &OpenCdmSession,
    buffer: &mut gst::BufferRef,
    subsamples: Option<&gst::Buffer>,
    subsample_count: u32,
    iv: Option<&gst::Buffer>,
    key_id: Option<&gst::Buffer>,
    init_with_last_15: bool,
) -> Result<()> {
    decrypt_v2(
        session,
        buffer,
        subsamples,
        subsample_count,
        EncryptionScheme::AesCtrCenc,
        EncryptionPattern::default(),
        iv,
        key_id,
        init_with_last_15,
    )
}

/// Decrypts a sample of any scheme in place. See [`decrypt`].
#[allow(clippy::too_many_arguments)]
pub fn decrypt_v2(
    session: &OpenCdmSession,
    buffer: &mut gst::BufferRef,
    subsamples: Option<&gst::Buffer>,
    subsample_count: u32,
    scheme: EncryptionScheme,
    pattern: EncryptionPattern,
    iv: Option<&gst::Buffer>,
    key_id: Option<&gst::Buffer>,
    init_with_last_15: bool,
) -> Result<()> {
    let protection = Protection {
        scheme,
        pattern,
        iv: iv.cloned(),
        key_id: key_id.cloned(),
        subsamples: subsamples.cloned(),
        subsample_count,
        init_with_last_15,
    };
    decrypt_protected(session, buffer, &protection, false, None)
}

/// Decrypts a sample in place, described by its attached `GstProtectionMeta`.
///
/// `caps`, when given, is parsed into the media sizing hint. A set
/// `initWithLast15` flag reverses the IV bytes before they are sent.
pub fn decrypt_buffer(
    session: &OpenCdmSession,
    buffer: &mut gst::BufferRef,
    caps: Option<&gst::CapsRef>,
) -> Result<()> {
    let protection = {
        let meta = buffer.meta::<gst::ProtectionMeta>().ok_or_else(|| {
            gst::error!(CAT, "Buffer carries no protection meta");
            Error::InvalidDecryptBuffer
        })?;
        Protection::from_structure(meta.info())?
    };
    let properties = caps.map(|caps| session.media_properties_from_caps(&caps.to_string()));
    decrypt_protected(
        session,
        buffer,
        &protection,
        protection.init_with_last_15,
        properties,
    )
}

/// Sample description without a sub-sample map; `reverse_iv` flips the IV bytes.
fn sample_info(protection: &Protection, iv: &[u8], key_id: &[u8], reverse_iv: bool) -> SampleInfo {
    let mut iv = iv.to_vec();
    if reverse_iv {
        iv.reverse();
    }
    SampleInfo {
        scheme: protection.scheme,
        pattern: protection.pattern,
        iv,
        key_id: key_id.to_vec(),
        subsamples: Vec::new(),
    }
}

/// Fits the regions of a gathered sample into one channel request.
///
/// A `cenc` keystream runs on across regions, so a map longer than the
/// channel allows collapses into a single region. Other schemes restart per
/// region and cannot be merged.
fn channel_regions(
    scheme: EncryptionScheme,
    regions: Vec<SubSample>,
    encrypted_len: usize,
) -> Result<Vec<SubSample>> {
    if regions.len() <= MAX_SUBSAMPLES {
        return Ok(regions);
    }
    if scheme == EncryptionScheme::AesCtrCenc {
        trace!("Merging {} cenc sub-samples into one region", regions.len());
        let encrypted = u32::try_from(encrypted_len).map_err(|_| Error::InvalidArg)?;
        return Ok(vec![SubSample::new(0, encrypted)]);
    }
    gst::error!(
        CAT,
        "{} sub-samples exceed the limit of {} per {:?} sample",
        regions.len(),
        MAX_SUBSAMPLES,
        scheme
    );
    Err(Error::InvalidArg)
}

fn decrypt_protected(
    session: &OpenCdmSession,
    buffer: &mut gst::BufferRef,
    protection: &Protection,
    reverse_iv: bool,
    properties: Option<MediaProperties>,
) -> Result<()> {
    // Maps are released in reverse order of creation on every return path.
    let mut data = buffer
        .map_writable()
        .map_err(|_| map_failed("sample"))?;

    if protection.is_clear() {
        trace!("Clear sample of {} bytes", data.len());
        return session.transform_clear(data.as_mut_slice());
    }

    let iv_map = protection
        .iv
        .as_ref()
        .map(|iv| iv.map_readable())
        .transpose()
        .map_err(|_| map_failed("IV"))?;
    let key_map = protection
        .key_id
        .as_ref()
        .map(|key_id| key_id.map_readable())
        .transpose()
        .map_err(|_| map_failed("key ID"))?;

    let info = sample_info(
        protection,
        iv_map.as_ref().map_or(&[][..], |map| map.as_slice()),
        key_map.as_ref().map_or(&[][..], |map| map.as_slice()),
        reverse_iv,
    );

    match &protection.subsamples {
        Some(subsamples) if protection.subsample_count > 0 => {
            let map = subsamples
                .map_readable()
                .map_err(|_| map_failed("sub-sample map"))?;
            let count = protection.subsample_count as usize;
            let mut reader = SubsampleReader::new(map.as_slice());
            let reserved = session.registry().config().reserved_token_size;

            let mut gathered = gather(data.as_slice(), &mut reader, count, reserved)?;
            let regions = channel_regions(
                protection.scheme,
                std::mem::take(&mut gathered.regions),
                gathered.encrypted_len,
            )?;
            let info = info.with_subsamples(regions);
            trace!(
                "Gathered {} encrypted bytes from {} sub-samples",
                gathered.encrypted_len,
                count
            );
            session.decrypt(
                gathered.payload_mut(),
                Some(&info),
                protection.init_with_last_15,
                properties.as_ref(),
            )?;
            scatter(&gathered.data, &mut reader, count, data.as_mut_slice())
        }
        _ => session.decrypt(
            data.as_mut_slice(),
            Some(&info),
            protection.init_with_last_15,
            properties.as_ref(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init() {
        gst::init().unwrap();
    }

    #[test]
    fn structure_fields_map_to_protection() {
        init();
        let iv = gst::Buffer::from_slice([1u8; 16]);
        let info = gst::Structure::builder("application/x-cenc")
            .field("cipher-mode", "cbcs")
            .field("crypt_byte_block", 1u32)
            .field("skip_byte_block", 9u32)
            .field("constant_iv", iv.clone())
            .field("subsample_count", 0u32)
            .field("initWithLast15", true)
            .build();
        let protection = Protection::from_structure(&info).unwrap();
        assert_eq!(protection.scheme, EncryptionScheme::AesCbcCbcs);
        assert_eq!(protection.pattern, EncryptionPattern::new(1, 9));
        assert!(protection.iv.is_some());
        assert!(protection.key_id.is_none());
        assert!(protection.init_with_last_15);
        assert!(!protection.is_clear());
    }

    #[test]
    fn missing_fields_default_to_unpatterned_cenc() {
        init();
        let info = gst::Structure::new_empty("application/x-cenc");
        let protection = Protection::from_structure(&info).unwrap();
        assert_eq!(protection.scheme, EncryptionScheme::AesCtrCenc);
        assert_eq!(protection.pattern, EncryptionPattern::default());
        assert!(!protection.init_with_last_15);
        assert!(protection.is_clear());
    }

    #[test]
    fn init_with_last_15_reverses_the_iv() {
        let protection = Protection {
            scheme: EncryptionScheme::AesCtrCens,
            pattern: EncryptionPattern::new(1, 9),
            ..Protection::default()
        };
        let iv: Vec<u8> = (0..16).collect();
        let info = sample_info(&protection, &iv, &[7; 16], true);
        assert_eq!(info.iv, (0..16).rev().collect::<Vec<u8>>());
        assert_eq!(info.key_id, [7; 16]);
        assert_eq!(info.scheme, EncryptionScheme::AesCtrCens);

        let info = sample_info(&protection, &iv, &[], false);
        assert_eq!(info.iv, iv);
        assert!(info.subsamples.is_empty());
    }

    #[test]
    fn long_cenc_maps_collapse_into_one_region() {
        let regions = vec![SubSample::new(0, 3); MAX_SUBSAMPLES + 1];
        let merged = channel_regions(EncryptionScheme::AesCtrCenc, regions, 771).unwrap();
        assert_eq!(merged, vec![SubSample::new(0, 771)]);

        let regions = vec![SubSample::new(0, 3); MAX_SUBSAMPLES];
        let kept = channel_regions(EncryptionScheme::AesCbcCbcs, regions.clone(), 768).unwrap();
        assert_eq!(kept, regions);
    }

    #[test]
    fn long_pattern_maps_are_rejected() {
        init();
        let regions = vec![SubSample::new(0, 16); MAX_SUBSAMPLES + 1];
        assert!(matches!(
            channel_regions(EncryptionScheme::AesCbcCbcs, regions, 16 * 257),
            Err(Error::InvalidArg)
        ));
    }

    #[test]
    fn unknown_cipher_modes_are_rejected() {
        init();
        let info = gst::Structure::builder("application/x-cenc")
            .field("cipher-mode", "xyz1")
            .build();
        assert!(matches!(
            Protection::from_structure(&info),
            Err(Error::InvalidArg)
        ));
    }
}
