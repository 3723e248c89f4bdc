// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! C ABI for the OCDM client.
//!
//! Exposes the `opencdm_*` entry points native media players link against.
//! Systems and sessions are handed out as boxed opaque handles
//! ([`OpenCDMSystem`], [`OpenCDMSession`]) and released through the matching
//! `opencdm_destruct_*` call. Every function returns an `OpenCDMError` code
//! (see [`ocdm::codes`]) unless documented otherwise.
//!
//! The process-wide [`Registry`] is not created on first use: the embedding
//! application installs it with [`install`] once it has a transport to the
//! DRM service. Until then every call fails with `ERROR_INVALID_ACCESSOR`.
//!
//! Output buffers follow one contract: the caller passes the buffer and its
//! capacity, the call stores the required size back into the size argument
//! and returns `ERROR_MORE_DATA_AVAILBALE` when the buffer is null or too small.

use std::ffi::{CStr, c_char};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{PoisonError, RwLock};

use ocdm::{Error, Registry, Status, codes};
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod callbacks;
mod session;
mod system;
mod types;

pub use callbacks::OpenCDMSessionCallbacks;
pub use session::*;
pub use system::*;
pub use types::*;

/// `OpenCDMError` as seen by C callers.
pub type OpenCDMError = Status;

static REGISTRY: RwLock<Option<Registry>> = RwLock::new(None);

/// Installs the registry every `opencdm_*` call goes through.
///
/// Returns the previously installed registry, if any. Handles created through
/// the previous registry keep working against it.
pub fn install(registry: Registry) -> Option<Registry> {
    REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(registry)
}

/// Removes the installed registry. Subsequent calls fail with `ERROR_INVALID_ACCESSOR`.
pub fn uninstall() -> Option<Registry> {
    REGISTRY.write().unwrap_or_else(PoisonError::into_inner).take()
}

pub(crate) fn registry() -> ocdm::Result<Registry> {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(Error::InvalidAccessor)
}

/// Installs a `tracing` subscriber writing to stderr, filtered by `RUST_LOG`
/// (default `info`).
///
/// Returns `ERROR_FAIL` if the process already has a global subscriber.
#[unsafe(no_mangle)]
pub extern "C" fn opencdm_init_logging() -> OpenCDMError {
    catch_unwind(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        match tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
        {
            Ok(()) => codes::ERROR_NONE,
            Err(_) => codes::ERROR_FAIL,
        }
    })
    .unwrap_or(codes::ERROR_FAIL)
}

/// Runs `f`, turning a panic into `ERROR_FAIL` instead of unwinding into C.
pub(crate) fn guard(f: impl FnOnce() -> ocdm::Result<()>) -> OpenCDMError {
    catch_unwind(AssertUnwindSafe(|| ocdm::status_of(&f()))).unwrap_or_else(|_| {
        warn!("Panic caught at the C boundary");
        codes::ERROR_FAIL
    })
}

/// Borrows a NUL-terminated UTF-8 string.
///
/// # Safety
///
/// `value` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn c_str<'a>(value: *const c_char) -> ocdm::Result<&'a str> {
    if value.is_null() {
        return Err(Error::InvalidArg);
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    unsafe { CStr::from_ptr(value) }
        .to_str()
        .map_err(|_| Error::InvalidArg)
}

/// Borrows `length` bytes at `data`. A zero length yields an empty slice
/// whatever `data` is; a null `data` with a non-zero length is `InvalidArg`.
///
/// # Safety
///
/// When non-null, `data` must be valid for reads of `length` bytes for `'a`.
pub(crate) unsafe fn bytes<'a>(data: *const u8, length: usize) -> ocdm::Result<&'a [u8]> {
    if length == 0 {
        return Ok(&[]);
    }
    if data.is_null() {
        return Err(Error::InvalidArg);
    }
    // SAFETY: non-null and valid for `length` bytes per the caller's contract.
    Ok(unsafe { std::slice::from_raw_parts(data, length) })
}

/// Mutable counterpart of [`bytes`].
///
/// # Safety
///
/// When non-null, `data` must be valid for reads and writes of `length`
/// bytes for `'a` and not aliased.
pub(crate) unsafe fn bytes_mut<'a>(data: *mut u8, length: usize) -> ocdm::Result<&'a mut [u8]> {
    if length == 0 {
        return Ok(&mut []);
    }
    if data.is_null() {
        return Err(Error::InvalidArg);
    }
    // SAFETY: non-null, valid and unaliased per the caller's contract.
    Ok(unsafe { std::slice::from_raw_parts_mut(data, length) })
}

/// Copies `value` to a caller buffer following the more-data contract.
///
/// # Safety
///
/// `size` must be null or valid for reads and writes. When non-null, `out`
/// must be valid for writes of `*size` bytes.
pub(crate) unsafe fn write_out(value: &[u8], out: *mut u8, size: *mut u32) -> ocdm::Result<()> {
    if size.is_null() {
        return Err(Error::InvalidArg);
    }
    let required = u32::try_from(value.len()).map_err(|_| Error::BufferTooSmall)?;
    // SAFETY: `size` is non-null and valid per the caller's contract.
    let capacity = unsafe { size.replace(required) };
    if out.is_null() || capacity < required {
        return Err(Error::MoreDataAvailable {
            required: value.len(),
        });
    }
    // SAFETY: `out` holds at least `capacity >= value.len()` bytes.
    unsafe { std::ptr::copy_nonoverlapping(value.as_ptr(), out, value.len()) };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calls_without_a_registry_report_an_invalid_accessor() {
        assert!(matches!(registry(), Err(Error::InvalidAccessor)));
        let system = unsafe { opencdm_create_system(c"org.w3.clearkey".as_ptr()) };
        assert!(system.is_null());
        assert_eq!(
            unsafe { opencdm_is_type_supported(c"org.w3.clearkey".as_ptr(), c"".as_ptr()) },
            codes::ERROR_INVALID_ACCESSOR
        );
    }

    #[test]
    fn write_out_reports_the_required_size() {
        let value = [1u8, 2, 3, 4];
        let mut size = 2u32;
        let mut small = [0u8; 2];
        let result = unsafe { write_out(&value, small.as_mut_ptr(), &mut size) };
        assert!(matches!(result, Err(Error::MoreDataAvailable { required: 4 })));
        assert_eq!(size, 4);

        let mut out = [0u8; 8];
        let result = unsafe { write_out(&value, out.as_mut_ptr(), &mut size) };
        assert!(result.is_ok());
        assert_eq!(&out[..4], &value);

        let mut size = 0u32;
        let result = unsafe { write_out(&value, std::ptr::null_mut(), &mut size) };
        assert!(result.is_err());
        assert_eq!(size, 4);
    }

    #[test]
    fn null_strings_and_buffers_are_invalid_arguments() {
        assert!(matches!(
            unsafe { c_str(std::ptr::null()) },
            Err(Error::InvalidArg)
        ));
        assert!(matches!(
            unsafe { bytes(std::ptr::null(), 3) },
            Err(Error::InvalidArg)
        ));
        assert_eq!(unsafe { bytes(std::ptr::null(), 0) }.map(<[u8]>::len).ok(), Some(0));
    }
}
