// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

use std::ffi::c_char;

use ocdm::{Error, OpenCdmSystem, codes};
use tracing::{debug, warn};

use crate::{OpenCDMError, c_str, guard, registry, write_out};

/// Opaque handle to one key system.
pub struct OpenCDMSystem {
    system: OpenCdmSystem,
}

impl OpenCDMSystem {
    pub fn system(&self) -> &OpenCdmSystem {
        &self.system
    }
}

/// # Safety
///
/// `system` must be null or a live handle from [`opencdm_create_system`].
pub(crate) unsafe fn system_ref<'a>(
    system: *const OpenCDMSystem,
) -> ocdm::Result<&'a OpenCdmSystem> {
    // SAFETY: null or live per the caller's contract.
    unsafe { system.as_ref() }
        .map(OpenCDMSystem::system)
        .ok_or(Error::InvalidArg)
}

/// Checks whether the DRM service supports `key_system`, optionally for a
/// given `mime_type` (an empty string asks about the key system alone).
///
/// # Safety
///
/// Both arguments must be null or NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_is_type_supported(
    key_system: *const c_char,
    mime_type: *const c_char,
) -> OpenCDMError {
    guard(|| {
        let registry = registry()?;
        // SAFETY: forwarded from the caller.
        let key_system = unsafe { c_str(key_system) }?;
        let mime_type = if mime_type.is_null() {
            ""
        } else {
            // SAFETY: as above.
            unsafe { c_str(mime_type) }?
        };
        registry.is_type_supported(key_system, mime_type)
    })
}

/// Creates a system handle for `key_system`. Returns null on failure.
///
/// # Safety
///
/// `key_system` must be null or a NUL-terminated string. The returned handle
/// must be released with [`opencdm_destruct_system`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_create_system(key_system: *const c_char) -> *mut OpenCDMSystem {
    let mut created = std::ptr::null_mut();
    let status = guard(|| {
        let registry = registry()?;
        // SAFETY: forwarded from the caller.
        let key_system = unsafe { c_str(key_system) }?;
        let system = registry.create_system(key_system)?;
        debug!("Created {} system {}", key_system, system.id());
        created = Box::into_raw(Box::new(OpenCDMSystem { system }));
        Ok(())
    });
    if status != codes::ERROR_NONE {
        warn!("Creating system failed: {status:#x}");
    }
    created
}

/// Releases a system handle. Sessions created from it stay valid.
///
/// # Safety
///
/// `system` must be null or a handle from [`opencdm_create_system`] not yet destructed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_destruct_system(system: *mut OpenCDMSystem) -> OpenCDMError {
    if system.is_null() {
        return codes::ERROR_INVALID_ARG;
    }
    guard(|| {
        // SAFETY: ownership returns from the caller, who no longer uses the pointer.
        drop(unsafe { Box::from_raw(system) });
        Ok(())
    })
}

/// Copies the system metadata as a NUL-terminated string.
///
/// `size` holds the capacity of `metadata` on entry and the required size,
/// terminator included, on return.
///
/// # Safety
///
/// `system` must be null or a live handle. `size` must be null or valid, and
/// `metadata` must be null or valid for `*size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_system_get_metadata(
    system: *const OpenCDMSystem,
    metadata: *mut c_char,
    size: *mut u32,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let system = unsafe { system_ref(system) }?;
        let mut value = system.metadata().as_bytes().to_vec();
        value.push(0);
        // SAFETY: as above.
        unsafe { write_out(&value, metadata.cast(), size) }
    })
}

/// # Safety
///
/// `system` must be null or a live handle; `certificate` valid for `length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_system_set_server_certificate(
    system: *const OpenCDMSystem,
    certificate: *const u8,
    length: u16,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (system, certificate) =
            unsafe { (system_ref(system)?, crate::bytes(certificate, length.into())?) };
        system.set_server_certificate(certificate)
    })
}

/// Stores the DRM engine's secure clock, in seconds, in `time`.
///
/// # Safety
///
/// `system` must be null or a live handle; `time` null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_system_get_drm_time(
    system: *const OpenCDMSystem,
    time: *mut u64,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let system = unsafe { system_ref(system) }?;
        let time = unsafe { time.as_mut() }.ok_or(Error::InvalidArg)?;
        *time = system.drm_system_time()?;
        Ok(())
    })
}

/// # Safety
///
/// `system` must be null or a live handle; `limit` null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_system_ext_get_ldl_session_limit(
    system: *const OpenCDMSystem,
    limit: *mut u32,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let system = unsafe { system_ref(system) }?;
        let limit = unsafe { limit.as_mut() }.ok_or(Error::InvalidArg)?;
        *limit = system.ldl_session_limit()?;
        Ok(())
    })
}

/// Returns `1` if secure stops are enabled, `0` otherwise or on failure.
///
/// # Safety
///
/// `system` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_system_ext_is_secure_stop_enabled(
    system: *const OpenCDMSystem,
) -> u32 {
    let mut enabled = false;
    guard(|| {
        // SAFETY: forwarded from the caller.
        enabled = unsafe { system_ref(system) }?.is_secure_stop_enabled()?;
        Ok(())
    });
    enabled.into()
}

/// # Safety
///
/// `system` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_system_ext_enable_secure_stop(
    system: *const OpenCDMSystem,
    enable: u32,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        unsafe { system_ref(system) }?.enable_secure_stop(enable != 0)
    })
}

/// Clears all secure stops; returns how many were cleared (`0` on failure).
///
/// # Safety
///
/// `system` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_system_ext_reset_secure_stop(system: *const OpenCDMSystem) -> u32 {
    let mut cleared = 0;
    guard(|| {
        // SAFETY: forwarded from the caller.
        cleared = unsafe { system_ref(system) }?.reset_secure_stop()?;
        Ok(())
    });
    cleared
}

/// Copies the pending secure stop IDs, `id_length` bytes each, back to back.
///
/// `count` holds the capacity of `ids` in entries on entry and the number of
/// IDs on return. IDs longer than `id_length` are an `ERROR_INVALID_ARG`.
///
/// # Safety
///
/// `system` must be null or a live handle, `count` null or valid, and `ids`
/// null or valid for `*count * id_length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_system_ext_get_secure_stop_ids(
    system: *const OpenCDMSystem,
    ids: *mut u8,
    id_length: u8,
    count: *mut u32,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let system = unsafe { system_ref(system) }?;
        let count = unsafe { count.as_mut() }.ok_or(Error::InvalidArg)?;
        let stops = system.secure_stop_ids()?;
        let width = usize::from(id_length);
        if stops.iter().any(|id| id.len() > width) {
            return Err(Error::InvalidArg);
        }
        let capacity = *count as usize;
        *count = u32::try_from(stops.len()).map_err(|_| Error::BufferTooSmall)?;
        if stops.len() > capacity || (ids.is_null() && !stops.is_empty()) {
            return Err(Error::MoreDataAvailable {
                required: stops.len() * width,
            });
        }
        // SAFETY: `ids` holds `capacity >= stops.len()` entries of `width` bytes.
        let out = unsafe { crate::bytes_mut(ids, stops.len() * width) }?;
        for (slot, id) in out.chunks_exact_mut(width.max(1)).zip(&stops) {
            slot.fill(0);
            slot[..id.len()].copy_from_slice(id);
        }
        Ok(())
    })
}

/// Copies the secure stop of `session_id` following the more-data contract.
///
/// # Safety
///
/// `system` must be null or a live handle, `session_id` valid for
/// `session_id_length` bytes, `size` null or valid, and `data` null or valid
/// for `*size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_system_ext_get_secure_stop(
    system: *const OpenCDMSystem,
    session_id: *const u8,
    session_id_length: u32,
    data: *mut u8,
    size: *mut u32,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (system, session_id) =
            unsafe { (system_ref(system)?, crate::bytes(session_id, session_id_length as usize)?) };
        let stop = system.secure_stop(session_id)?;
        // SAFETY: as above.
        unsafe { write_out(&stop, data, size) }
    })
}

/// # Safety
///
/// `system` must be null or a live handle; the byte arguments valid for their lengths.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_system_ext_commit_secure_stop(
    system: *const OpenCDMSystem,
    session_id: *const u8,
    session_id_length: u32,
    server_response: *const u8,
    server_response_length: u32,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let (system, session_id, response) = unsafe {
            (
                system_ref(system)?,
                crate::bytes(session_id, session_id_length as usize)?,
                crate::bytes(server_response, server_response_length as usize)?,
            )
        };
        system.commit_secure_stop(session_id, response)
    })
}

/// # Safety
///
/// `system` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_delete_key_store(system: *const OpenCDMSystem) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        unsafe { system_ref(system) }?.delete_key_store()
    })
}

/// # Safety
///
/// `system` must be null or a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_delete_secure_store(system: *const OpenCDMSystem) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        unsafe { system_ref(system) }?.delete_secure_store()
    })
}

/// Copies the key store hash into `hash`, which holds `length` bytes.
///
/// # Safety
///
/// `system` must be null or a live handle; `hash` null or valid for `length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_get_key_store_hash_ext(
    system: *const OpenCDMSystem,
    hash: *mut u8,
    length: u32,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let value = unsafe { system_ref(system) }?.key_store_hash()?;
        let mut size = length;
        // SAFETY: as above.
        unsafe { write_out(&value, hash, &mut size) }
    })
}

/// Copies the secure store hash into `hash`, which holds `length` bytes.
///
/// # Safety
///
/// `system` must be null or a live handle; `hash` null or valid for `length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn opencdm_get_secure_store_hash_ext(
    system: *const OpenCDMSystem,
    hash: *mut u8,
    length: u32,
) -> OpenCDMError {
    guard(|| {
        // SAFETY: forwarded from the caller.
        let value = unsafe { system_ref(system) }?.secure_store_hash()?;
        let mut size = length;
        // SAFETY: as above.
        unsafe { write_out(&value, hash, &mut size) }
    })
}
