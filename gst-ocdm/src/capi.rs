// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! `opencdm_gstreamer_*` entry points for C players.

use std::panic::{AssertUnwindSafe, catch_unwind};

use glib::translate::from_glib_none;
use gstreamer as gst;
use ocdm::{EncryptionPattern, EncryptionScheme, Error, codes};
use ocdm_capi::{OpenCDMError, OpenCDMSession, session_ref};

use crate::{decrypt, decrypt_buffer, decrypt_v2};

fn guard(f: impl FnOnce() -> ocdm::Result<()>) -> OpenCDMError {
    catch_unwind(AssertUnwindSafe(|| ocdm::status_of(&f()))).unwrap_or(codes::ERROR_FAIL)
}

/// Takes a reference on an optional C buffer.
///
/// # Safety
///
/// `buffer` must be null or a valid `GstBuffer`.
unsafe fn optional_buffer(buffer: *mut gst::ffi::GstBuffer) -> Option<gst::Buffer> {
    // SAFETY: non-null and valid per the caller's contract.
    (!buffer.is_null()).then(|| unsafe { from_glib_none(buffer) })
}

/// # Safety
///
/// `buffer` must be null or a valid, writable `GstBuffer` not accessed
/// elsewhere for the duration of the borrow.
unsafe fn sample_buffer<'a>(
    buffer: *mut gst::ffi::GstBuffer,
) -> ocdm::Result<&'a mut gst::BufferRef> {
    if buffer.is_null() {
        return Err(Error::InvalidArg);
    }
    // SAFETY: non-null and exclusively borrowed per the caller's contract.
    Ok(unsafe { gst::BufferRef::from_mut_ptr(buffer) })
}

/// Decrypts `buffer` in place as AES-CTR.
///
/// `sub_sample` (packed map of `sub_sample_count` entries), `iv` and
/// `key_id` may each be null. With all three null the sample is clear.
///
/// # Safety
///
/// `session` must be null or a live session handle; `buffer` a writable
/// `GstBuffer`; the other buffers null or valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_gstreamer_session_decrypt(
    session: *const OpenCDMSession,
    buffer: *mut gst::ffi::GstBuffer,
    sub_sample: *mut gst::ffi::GstBuffer,
    sub_sample_count: u32,
    iv: *mut gst::ffi::GstBuffer,
    key_id: *mut gst::ffi::GstBuffer,
    init_with_last_15: u32,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (session, buffer, sub_sample, iv, key_id) = unsafe {
            (
                session_ref(session)?,
                sample_buffer(buffer)?,
                optional_buffer(sub_sample),
                optional_buffer(iv),
                optional_buffer(key_id),
            )
        };
        decrypt(
            session,
            buffer,
            sub_sample.as_ref(),
            sub_sample_count,
            iv.as_ref(),
            key_id.as_ref(),
            init_with_last_15 != 0,
        )
    })
}

/// Decrypts `buffer` in place with any scheme (`0` clear, `1` cenc, `2`
/// cbc1, `3` cens, `4` cbcs) and pattern.
///
/// # Safety
///
/// Same as [`opencdm_gstreamer_session_decrypt`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_gstreamer_session_decrypt_v2(
    session: *const OpenCDMSession,
    buffer: *mut gst::ffi::GstBuffer,
    sub_sample: *mut gst::ffi::GstBuffer,
    sub_sample_count: u32,
    scheme: u32,
    pattern: EncryptionPattern,
    iv: *mut gst::ffi::GstBuffer,
    key_id: *mut gst::ffi::GstBuffer,
    init_with_last_15: u32,
) -> OpenCDMError {
    guard(|| {
        let scheme = EncryptionScheme::from_raw(scheme).ok_or(Error::InvalidArg)?;
        // SAFETY: forwarded from the caller.
        let (session, buffer, sub_sample, iv, key_id) = unsafe {
            (
                session_ref(session)?,
                sample_buffer(buffer)?,
                optional_buffer(sub_sample),
                optional_buffer(iv),
                optional_buffer(key_id),
            )
        };
        decrypt_v2(
            session,
            buffer,
            sub_sample.as_ref(),
            sub_sample_count,
            scheme,
            pattern,
            iv.as_ref(),
            key_id.as_ref(),
            init_with_last_15 != 0,
        )
    })
}

/// Decrypts `buffer` in place as described by its `GstProtectionMeta`.
///
/// `caps` may be null; otherwise it supplies the media sizing hint.
///
/// # Safety
///
/// `session` must be null or a live session handle; `buffer` a writable
/// `GstBuffer`; `caps` null or a valid `GstCaps`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_gstreamer_session_decrypt_buffer(
    session: *const OpenCDMSession,
    buffer: *mut gst::ffi::GstBuffer,
    caps: *const gst::ffi::GstCaps,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (session, buffer, caps) = unsafe {
            (
                session_ref(session)?,
                sample_buffer(buffer)?,
                (!caps.is_null()).then(|| gst::CapsRef::from_ptr(caps)),
            )
        };
        decrypt_buffer(session, buffer, caps)
    })
}
