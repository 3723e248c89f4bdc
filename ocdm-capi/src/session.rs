// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

use std::ffi::{CString, c_char, c_void};
use std::sync::Arc;
use std::time::Duration;

use ocdm::{
    EncryptionPattern, EncryptionScheme, Error, KeyStatus, OpenCdmSession, SampleInfo, codes,
};
use tracing::debug;

use crate::callbacks::CallbackBridge;
use crate::system::system_ref;
use crate::{
    OpenCDMError, OpenCDMMediaProperties, OpenCDMSampleInfo, OpenCDMSessionCallbacks, OpenCDMSystem,
    bytes, bytes_mut, c_str, guard, registry, write_out,
};

/// Returned by [`opencdm_session_error`] for a key the session does not know.
pub const KEY_ERROR_UNKNOWN: u32 = u32::MAX;

/// Opaque handle to one CDM session.
///
/// Each handle holds its own reference: handles from
/// [`opencdm_get_session`] and [`opencdm_construct_session`] are released
/// independently with [`opencdm_destruct_session`].
pub struct OpenCDMSession {
    session: OpenCdmSession,
    id: CString,
    buffer_id: CString,
    bridge: Option<Arc<CallbackBridge>>,
}

impl OpenCDMSession {
    fn boxed(
        session: OpenCdmSession,
        bridge: Option<Arc<CallbackBridge>>,
    ) -> ocdm::Result<*mut Self> {
        let handle = Box::into_raw(Box::new(Self {
            id: CString::new(session.id())?,
            buffer_id: CString::new(session.buffer_id())?,
            session,
            bridge,
        }));
        // SAFETY: just allocated above.
        if let Some(bridge) = unsafe { &(*handle).bridge } {
            bridge.attach(handle);
        }
        Ok(handle)
    }

    pub fn session(&self) -> &OpenCdmSession {
        &self.session
    }
}

impl Drop for OpenCDMSession {
    fn drop(&mut self) {
        if let Some(bridge) = &self.bridge {
            bridge.detach();
        }
    }
}

/// Borrows the session behind a C handle.
///
/// # Safety
///
/// `session` must be null or a live handle.
pub unsafe fn session_ref<'a>(session: *const OpenCDMSession) -> ocdm::Result<&'a OpenCdmSession> {
    // SAFETY: null or live per the caller's contract.
    unsafe { session.as_ref() }
        .map(OpenCDMSession::session)
        .ok_or(Error::InvalidSession)
}

fn key_status_code(status: KeyStatus) -> u32 {
    status as u32
}

/// Finds the session holding usable `key_id`, waiting up to `wait_time` ms
/// for the key to arrive. Returns null if none shows up.
///
/// # Safety
///
/// `key_id` must be valid for `length` bytes. A non-null result must be
/// released with [`opencdm_destruct_session`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_get_session(
    key_id: *const u8,
    length: u8,
    wait_time: u32,
) -> *mut OpenCDMSession {
    let mut found = std::ptr::null_mut();
    guard(|| {
        // SAFETY: forwarded from the caller.
        let key_id = unsafe { bytes(key_id, length.into()) }?;
        let timeout = Duration::from_millis(wait_time.into());
        if let Some(session) = registry()?.find_session(key_id, timeout, None) {
            found = OpenCDMSession::boxed(session, None)?;
        }
        Ok(())
    });
    found
}

/// Same as [`opencdm_get_session`], restricted to sessions of `system`.
///
/// # Safety
///
/// `system` must be null or a live handle; `key_id` valid for `length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_get_system_session(
    system: *const OpenCDMSystem,
    key_id: *const u8,
    length: u8,
    wait_time: u32,
) -> *mut OpenCDMSession {
    let mut found = std::ptr::null_mut();
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (system, key_id) = unsafe { (system_ref(system)?, bytes(key_id, length.into())?) };
        if let Some(session) = system.session(key_id, Duration::from_millis(wait_time.into())) {
            found = OpenCDMSession::boxed(session, None)?;
        }
        Ok(())
    });
    found
}

/// Constructs a session and stores its handle in `session`.
///
/// `callbacks` may be null. A challenge the DRM engine produces during
/// construction is delivered once the handle exists, before this call returns.
///
/// # Safety
///
/// `system` must be null or a live handle; `init_data_type` a NUL-terminated
/// string; the byte arguments valid for their lengths; `callbacks` null or
/// valid for reads; `session` valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_construct_session(
    system: *const OpenCDMSystem,
    license_type: i32,
    init_data_type: *const c_char,
    init_data: *const u8,
    init_data_length: u16,
    cdm_data: *const u8,
    cdm_data_length: u16,
    callbacks: *const OpenCDMSessionCallbacks,
    user_data: *mut c_void,
    session: *mut *mut OpenCDMSession,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let out = unsafe { session.as_mut() }.ok_or(Error::InvalidArg)?;
        *out = std::ptr::null_mut();
        // SAFETY: as above.
        let (system, init_data_type, init_data, cdm_data, callbacks) = unsafe {
            (
                system_ref(system)?,
                c_str(init_data_type)?,
                bytes(init_data, init_data_length.into())?,
                bytes(cdm_data, cdm_data_length.into())?,
                callbacks.as_ref().copied(),
            )
        };
        let bridge = callbacks.map(|callbacks| Arc::new(CallbackBridge::new(callbacks, user_data)));
        let created = system.create_session(
            license_type,
            init_data_type,
            init_data,
            cdm_data,
            bridge
                .clone()
                .map(|bridge| bridge as Arc<dyn ocdm::SessionCallbacks>),
        )?;
        debug!("Constructed session {}", created.id());
        *out = OpenCDMSession::boxed(created, bridge)?;
        Ok(())
    })
}

/// Releases a session handle. The session itself goes away with its last handle.
///
/// # Safety
///
/// `session` must be null or a handle not yet destructed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_destruct_session(session: *mut OpenCDMSession) -> OpenCDMError {
    if session.is_null() {
        return codes::ERROR_INVALID_SESSION;
    }
    guard(|| {
        // SAFETY: ownership returns from the caller, who no longer uses the pointer.
        drop(unsafe { Box::from_raw(session) });
        Ok(())
    })
}

/// Session ID as a NUL-terminated string owned by the handle, or null.
///
/// # Safety
///
/// `session` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_id(session: *const OpenCDMSession) -> *const c_char {
    // SAFETY: forwarded from the caller.
    unsafe { session.as_ref() }.map_or(std::ptr::null(), |handle| handle.id.as_ptr())
}

/// Name of the session's shared decrypt buffer, owned by the handle, or null.
///
/// # Safety
///
/// `session` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_buffer_id(
    session: *const OpenCDMSession,
) -> *const c_char {
    // SAFETY: forwarded from the caller.
    unsafe { session.as_ref() }.map_or(std::ptr::null(), |handle| handle.buffer_id.as_ptr())
}

/// Returns `1` if the session knows `key_id`, in either GUID byte order.
///
/// # Safety
///
/// `session` must be null or a live handle; `key_id` valid for `length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_has_key_id(
    session: *const OpenCDMSession,
    length: u8,
    key_id: *const u8,
) -> u32 {
    // SAFETY: forwarded from the caller.
    match unsafe { (session_ref(session), bytes(key_id, length.into())) } {
        (Ok(session), Ok(key_id)) => session.has_key_id(key_id).into(),
        _ => 0,
    }
}

/// Status of `key_id` as a `KeyStatus` value. Unknown keys are
/// `StatusPending`; a null session is `InternalError`.
///
/// # Safety
///
/// `session` must be null or a live handle; `key_id` valid for `length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_status(
    session: *const OpenCDMSession,
    key_id: *const u8,
    length: u8,
) -> u32 {
    // SAFETY: forwarded from the caller.
    match unsafe { (session_ref(session), bytes(key_id, length.into())) } {
        (Ok(session), Ok(key_id)) => key_status_code(session.status(key_id)),
        _ => key_status_code(KeyStatus::InternalError),
    }
}

/// Error value of `key_id`: `0` when the key is fine, its status when it is
/// in an error state, [`KEY_ERROR_UNKNOWN`] when the session lacks the key.
///
/// # Safety
///
/// `session` must be null or a live handle; `key_id` valid for `length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_error(
    session: *const OpenCDMSession,
    key_id: *const u8,
    length: u8,
) -> u32 {
    // SAFETY: forwarded from the caller.
    match unsafe { (session_ref(session), bytes(key_id, length.into())) } {
        (Ok(session), Ok(key_id)) => session.key_error(key_id).unwrap_or(KEY_ERROR_UNKNOWN),
        _ => KEY_ERROR_UNKNOWN,
    }
}

/// Last system error reported by the DRM engine for the session.
///
/// # Safety
///
/// `session` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_system_error(session: *const OpenCDMSession) -> u32 {
    // SAFETY: forwarded from the caller.
    unsafe { session_ref(session) }.map_or(codes::ERROR_INVALID_SESSION, |session| {
        session.system_error()
    })
}

/// # Safety
///
/// `session` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_load(session: *const OpenCDMSession) -> OpenCDMError {
    // SAFETY: forwarded from the caller.
    guard(|| unsafe { session_ref(session) }?.load())
}

/// Feeds a license server response to the session.
///
/// # Safety
///
/// `session` must be null or a live handle; `response` valid for `length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_update(
    session: *const OpenCDMSession,
    response: *const u8,
    length: u16,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (session, response) =
            unsafe { (session_ref(session)?, bytes(response, length.into())?) };
        session.update(response)
    })
}

/// # Safety
///
/// `session` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_remove(session: *const OpenCDMSession) -> OpenCDMError {
    // SAFETY: forwarded from the caller.
    guard(|| unsafe { session_ref(session) }?.remove())
}

/// # Safety
///
/// `session` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_close(session: *const OpenCDMSession) -> OpenCDMError {
    // SAFETY: forwarded from the caller.
    guard(|| unsafe { session_ref(session) }?.close())
}

/// # Safety
///
/// `session` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_resetoutputprotection(
    session: *const OpenCDMSession,
) -> OpenCDMError {
    // SAFETY: forwarded from the caller.
    guard(|| unsafe { session_ref(session) }?.reset_output_protection())
}

/// # Safety
///
/// `session` must be null or a live handle; `name` and `value` NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_set_parameter(
    session: *const OpenCDMSession,
    name: *const c_char,
    value: *const c_char,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (session, name, value) =
            unsafe { (session_ref(session)?, c_str(name)?, c_str(value)?) };
        session.set_parameter(name, value)
    })
}

/// Decrypts `encrypted` in place, described by the legacy argument list.
///
/// A null or empty `iv` together with a null or empty `key_id` sends the
/// sample without encryption metadata. `init_with_last_15` is forwarded
/// to the decryptor.
///
/// # Safety
///
/// `session` must be null or a live handle; `encrypted` valid for reads and
/// writes of `encrypted_length` bytes; `iv` and `key_id` valid for their lengths.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_decrypt(
    session: *const OpenCDMSession,
    encrypted: *mut u8,
    encrypted_length: u32,
    scheme: u32,
    pattern: EncryptionPattern,
    iv: *const u8,
    iv_length: u16,
    key_id: *const u8,
    key_id_length: u16,
    init_with_last_15: u32,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (session, data, iv, key_id) = unsafe {
            (
                session_ref(session)?,
                bytes_mut(encrypted, encrypted_length as usize)?,
                bytes(iv, iv_length.into())?,
                bytes(key_id, key_id_length.into())?,
            )
        };
        let info = if iv.is_empty() && key_id.is_empty() {
            None
        } else {
            let scheme = EncryptionScheme::from_raw(scheme).ok_or(Error::InvalidArg)?;
            Some(SampleInfo::cenc(iv, key_id).with_scheme(scheme, pattern))
        };
        session.decrypt(data, info.as_ref(), init_with_last_15 != 0, None)
    })
}

/// Decrypts `encrypted` in place, described by a [`OpenCDMSampleInfo`].
///
/// `sample_info` null sends the sample without encryption metadata;
/// `properties` null sends no media sizing hint.
///
/// # Safety
///
/// `session` must be null or a live handle; `encrypted` valid for reads and
/// writes of `encrypted_length` bytes; `sample_info` and `properties` null
/// or valid for reads, with every buffer they reference valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_decrypt_v2(
    session: *const OpenCDMSession,
    encrypted: *mut u8,
    encrypted_length: u32,
    sample_info: *const OpenCDMSampleInfo,
    properties: *const OpenCDMMediaProperties,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (session, data, info, properties) = unsafe {
            (
                session_ref(session)?,
                bytes_mut(encrypted, encrypted_length as usize)?,
                sample_info.as_ref().map(|info| info.to_sample_info()).transpose()?,
                properties.as_ref().map(|p| ocdm::MediaProperties::from(*p)),
            )
        };
        session.decrypt(data, info.as_ref(), false, properties.as_ref())
    })
}

/// # Safety
///
/// `session` must be null or a live handle; `header` valid for `length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_set_drm_header(
    session: *const OpenCDMSession,
    header: *const u8,
    length: u32,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (session, header) = unsafe { (session_ref(session)?, bytes(header, length as usize)?) };
        session.set_drm_header(header)
    })
}

/// Copies a license challenge following the more-data contract.
///
/// # Safety
///
/// `session` must be null or a live handle; `size` null or valid; `challenge`
/// null or valid for `*size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_get_challenge_data(
    session: *const OpenCDMSession,
    challenge: *mut u8,
    size: *mut u32,
    is_ldl: u32,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let value = unsafe { session_ref(session) }?.challenge_data(is_ldl != 0)?;
        // SAFETY: as above.
        unsafe { write_out(&value, challenge, size) }
    })
}

/// # Safety
///
/// `session` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_cancel_challenge_data(
    session: *const OpenCDMSession,
) -> OpenCDMError {
    // SAFETY: forwarded from the caller.
    guard(|| unsafe { session_ref(session) }?.cancel_challenge_data())
}

/// Stores a license and writes its 16-byte secure stop ID to `secure_stop_id`.
///
/// # Safety
///
/// `session` must be null or a live handle; `license` valid for `length`
/// bytes; `secure_stop_id` valid for writes of 16 bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_store_license_data(
    session: *const OpenCDMSession,
    license: *const u8,
    length: u32,
    secure_stop_id: *mut u8,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (session, license, out) = unsafe {
            (
                session_ref(session)?,
                bytes(license, length as usize)?,
                bytes_mut(secure_stop_id, 16)?,
            )
        };
        let id = session.store_license_data(license)?;
        let copied = id.len().min(out.len());
        out.fill(0);
        out[..copied].copy_from_slice(&id[..copied]);
        Ok(())
    })
}

/// # Safety
///
/// `session` must be null or a live handle; `key_id` valid for `length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_select_key_id(
    session: *const OpenCDMSession,
    length: u8,
    key_id: *const u8,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (session, key_id) = unsafe { (session_ref(session)?, bytes(key_id, length.into())?) };
        session.select_key_id(key_id)
    })
}

/// # Safety
///
/// `session` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_session_clean_decrypt_context(
    session: *const OpenCDMSession,
) -> OpenCDMError {
    // SAFETY: forwarded from the caller.
    guard(|| unsafe { session_ref(session) }?.clean_decrypt_context())
}
