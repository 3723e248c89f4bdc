// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Secure video path hook for clear samples.
//!
//! On platforms with a secure video path even unencrypted samples have to be
//! moved into protected memory before they reach the decoder. Platforms
//! provide that step as a shared library exporting
//!
//! ```c
//! int32_t ocdm_svp_transform_clear(uint8_t* data, uint32_t length);
//! ```

use std::ffi::OsStr;

use libloading::{Library, Symbol};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Symbol looked up by [`DynamicTransform::load`].
pub const TRANSFORM_SYMBOL: &[u8] = b"ocdm_svp_transform_clear\0";

/// Prepares a clear sample for the renderer.
pub trait SecureBufferTransform: Send + Sync {
    fn transform_clear(&self, data: &mut [u8]) -> Result<()>;
}

/// Leaves clear samples untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransform;

impl SecureBufferTransform for NoopTransform {
    fn transform_clear(&self, _data: &mut [u8]) -> Result<()> {
        Ok(())
    }
}

type TransformFn = unsafe extern "C" fn(*mut u8, u32) -> i32;

/// Transform provided by a platform library loaded at run time.
pub struct DynamicTransform {
    transform: TransformFn,
    // Keeps `transform` mapped.
    _library: Library,
}

impl DynamicTransform {
    pub fn load(path: impl AsRef<OsStr>) -> Result<Self> {
        let path = path.as_ref();
        // Safety: loading runs the library's initializers; the platform
        // library is trusted the same way the DRM service is.
        let library = unsafe { Library::new(path)? };
        let transform = unsafe {
            let symbol: Symbol<'_, TransformFn> = library.get(TRANSFORM_SYMBOL)?;
            *symbol
        };
        debug!("Loaded secure buffer transform from {}", path.to_string_lossy());
        Ok(Self {
            transform,
            _library: library,
        })
    }
}

impl SecureBufferTransform for DynamicTransform {
    fn transform_clear(&self, data: &mut [u8]) -> Result<()> {
        let length = u32::try_from(data.len()).map_err(|_| Error::InvalidArg)?;
        // Safety: the pointer and length describe `data`, which outlives the call.
        let result = unsafe { (self.transform)(data.as_mut_ptr(), length) };
        if result != 0 {
            warn!("Secure buffer transform failed with {result}");
            return Err(Error::Fail);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_leaves_data_alone() {
        let mut data = [1u8, 2, 3];
        NoopTransform.transform_clear(&mut data).unwrap();
        assert_eq!(data, [1, 2, 3]);
    }

    #[test]
    fn missing_library_is_a_loading_error() {
        assert!(matches!(
            DynamicTransform::load("/nonexistent/libocdm-svp.so"),
            Err(Error::LibLoading(_))
        ));
    }
}
