// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Error types for OCDM operations.
//!
//! This module defines the error type returned by session, registry and
//! decrypt-channel calls, mapping the numeric `OpenCDMError` codes used on the
//! RPC and C boundaries to an idiomatic Rust enum and back.

/// Raw numeric status as returned by a remote call or exported over the C ABI.
///
/// `0` is success; every other value is an error.
pub type Status = u32;

/// Numeric `OpenCDMError` codes.
pub mod codes {
    use super::Status;

    pub const ERROR_NONE: Status = 0;
    pub const ERROR_UNKNOWN: Status = 1;
    pub const ERROR_MORE_DATA_AVAILBALE: Status = 2;
    pub const ERROR_INTERFACE_NOT_IMPLEMENTED: Status = 3;
    pub const ERROR_BUFFER_TOO_SMALL: Status = 4;
    pub const ERROR_INVALID_ACCESSOR: Status = 0x8000_0001;
    pub const ERROR_KEYSYSTEM_NOT_SUPPORTED: Status = 0x8000_0002;
    pub const ERROR_INVALID_SESSION: Status = 0x8000_0003;
    pub const ERROR_INVALID_DECRYPT_BUFFER: Status = 0x8000_0004;
    pub const ERROR_OUT_OF_MEMORY: Status = 0x8000_0005;
    pub const ERROR_METHOD_NOT_IMPLEMENTED: Status = 0x8000_0006;
    pub const ERROR_FAIL: Status = 0x8000_4005;
    pub const ERROR_INVALID_ARG: Status = 0x8007_0057;
    pub const ERROR_SERVER_INTERNAL_ERROR: Status = 0x8004_C600;
    pub const ERROR_SERVER_INVALID_MESSAGE: Status = 0x8004_C601;
    pub const ERROR_SERVER_SERVICE_SPECIFIC: Status = 0x8004_C604;
    pub const ERROR_BUSY_CANNOT_INITIALIZE: Status = 0x8004_DD00;
}

/// Convenience result type using [`Error`] as the error variant.
pub type Result<T> = core::result::Result<T, Error>;

/// Errors that can occur when using the OCDM API.
///
/// Codes produced by the out-of-process DRM engine are never reinterpreted:
/// the well-known ones get their own variant, anything else is carried
/// verbatim in [`Error::Remote`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Unspecified failure reported by the DRM engine.
    #[error("Unknown error")]
    Unknown,

    /// The caller's output buffer was too small.
    ///
    /// `required` is the size the caller has to provide on retry.
    #[error("More data available ({required} bytes required)")]
    MoreDataAvailable { required: usize },

    /// The remote object does not implement the requested interface.
    #[error("Interface not implemented")]
    InterfaceNotImplemented,

    /// A buffer handed to the DRM engine was too small for the request.
    #[error("Buffer too small")]
    BufferTooSmall,

    /// The session registry is not connected to the DRM service.
    #[error("Invalid accessor")]
    InvalidAccessor,

    /// The requested key system is not supported by the DRM service.
    #[error("Key system not supported")]
    KeySystemNotSupported,

    /// The session handle is invalid or the remote session could not be built.
    #[error("Invalid session")]
    InvalidSession,

    /// A sample buffer (data, IV, key ID or sub-sample map) could not be mapped.
    #[error("Invalid decrypt buffer")]
    InvalidDecryptBuffer,

    /// The DRM engine ran out of memory.
    #[error("Out of memory")]
    OutOfMemory,

    /// An extended capability was requested but the remote session lacks it.
    #[error("Method not implemented")]
    MethodNotImplemented,

    /// Generic failure.
    #[error("Failed")]
    Fail,

    /// Caller input was null or malformed. Detected locally, never forwarded.
    #[error("Invalid argument")]
    InvalidArg,

    /// The DRM server hit an internal error.
    #[error("Server internal error")]
    ServerInternalError,

    /// The DRM server rejected a message as malformed.
    #[error("Server invalid message")]
    ServerInvalidMessage,

    /// The DRM server reported a service specific error.
    #[error("Server service specific error")]
    ServerServiceSpecific,

    /// The DRM engine is busy and cannot initialize.
    #[error("Busy, cannot initialize")]
    BusyCannotInitialize,

    /// A bounded wait on the decrypt handshake expired.
    #[error("Timeout")]
    Timeout,

    /// Any other status code returned by the remote side.
    #[error("Remote error: {0:#x}")]
    Remote(Status),

    /// Shared memory setup failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to convert a Rust string to a C-compatible null-terminated string.
    #[error("Null string: {0}")]
    NulString(#[from] std::ffi::NulError),

    /// Failed to load or resolve the secure-buffer library.
    #[error("Loading library: {0}")]
    LibLoading(#[from] libloading::Error),

    /// Rust-level failure with no numeric counterpart.
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Converts a remote status code to a Rust [`Result`].
    ///
    /// # Returns
    ///
    /// - `Ok(())` if `status == ERROR_NONE`
    /// - `Err(Error::...)` for any other code
    ///
    /// # Examples
    ///
    /// ```
    /// use ocdm::{Error, codes};
    ///
    /// assert!(Error::from_status(codes::ERROR_NONE).is_ok());
    /// assert!(matches!(
    ///     Error::from_status(codes::ERROR_INVALID_SESSION),
    ///     Err(Error::InvalidSession)
    /// ));
    /// assert!(matches!(Error::from_status(0x1234), Err(Error::Remote(0x1234))));
    /// ```
    pub fn from_status(status: Status) -> Result<()> {
        use codes::*;
        match status {
            ERROR_NONE => Ok(()),
            ERROR_UNKNOWN => Err(Error::Unknown),
            ERROR_MORE_DATA_AVAILBALE => Err(Error::MoreDataAvailable { required: 0 }),
            ERROR_INTERFACE_NOT_IMPLEMENTED => Err(Error::InterfaceNotImplemented),
            ERROR_BUFFER_TOO_SMALL => Err(Error::BufferTooSmall),
            ERROR_INVALID_ACCESSOR => Err(Error::InvalidAccessor),
            ERROR_KEYSYSTEM_NOT_SUPPORTED => Err(Error::KeySystemNotSupported),
            ERROR_INVALID_SESSION => Err(Error::InvalidSession),
            ERROR_INVALID_DECRYPT_BUFFER => Err(Error::InvalidDecryptBuffer),
            ERROR_OUT_OF_MEMORY => Err(Error::OutOfMemory),
            ERROR_METHOD_NOT_IMPLEMENTED => Err(Error::MethodNotImplemented),
            ERROR_FAIL => Err(Error::Fail),
            ERROR_INVALID_ARG => Err(Error::InvalidArg),
            ERROR_SERVER_INTERNAL_ERROR => Err(Error::ServerInternalError),
            ERROR_SERVER_INVALID_MESSAGE => Err(Error::ServerInvalidMessage),
            ERROR_SERVER_SERVICE_SPECIFIC => Err(Error::ServerServiceSpecific),
            ERROR_BUSY_CANNOT_INITIALIZE => Err(Error::BusyCannotInitialize),
            other => Err(Error::Remote(other)),
        }
    }

    /// Returns the numeric `OpenCDMError` code for this error.
    ///
    /// Rust-only failures collapse onto the closest C code: [`Error::Timeout`],
    /// [`Error::Io`], [`Error::LibLoading`] and [`Error::Other`] become
    /// `ERROR_FAIL`, [`Error::NulString`] becomes `ERROR_INVALID_ARG`.
    pub fn code(&self) -> Status {
        use codes::*;
        match self {
            Error::Unknown => ERROR_UNKNOWN,
            Error::MoreDataAvailable { .. } => ERROR_MORE_DATA_AVAILBALE,
            Error::InterfaceNotImplemented => ERROR_INTERFACE_NOT_IMPLEMENTED,
            Error::BufferTooSmall => ERROR_BUFFER_TOO_SMALL,
            Error::InvalidAccessor => ERROR_INVALID_ACCESSOR,
            Error::KeySystemNotSupported => ERROR_KEYSYSTEM_NOT_SUPPORTED,
            Error::InvalidSession => ERROR_INVALID_SESSION,
            Error::InvalidDecryptBuffer => ERROR_INVALID_DECRYPT_BUFFER,
            Error::OutOfMemory => ERROR_OUT_OF_MEMORY,
            Error::MethodNotImplemented => ERROR_METHOD_NOT_IMPLEMENTED,
            Error::Fail => ERROR_FAIL,
            Error::InvalidArg | Error::NulString(_) => ERROR_INVALID_ARG,
            Error::ServerInternalError => ERROR_SERVER_INTERNAL_ERROR,
            Error::ServerInvalidMessage => ERROR_SERVER_INVALID_MESSAGE,
            Error::ServerServiceSpecific => ERROR_SERVER_SERVICE_SPECIFIC,
            Error::BusyCannotInitialize => ERROR_BUSY_CANNOT_INITIALIZE,
            Error::Remote(code) => *code,
            Error::Timeout | Error::Io(_) | Error::LibLoading(_) | Error::Other(_) => ERROR_FAIL,
        }
    }
}

/// Error for a remote call that failed with `status`.
pub(crate) fn remote_error(status: Status) -> Error {
    Error::from_status(status).err().unwrap_or(Error::Unknown)
}

/// Collapses a unit [`Result`] into a status code, `ERROR_NONE` on success.
pub fn status_of(result: &Result<()>) -> Status {
    match result {
        Ok(()) => codes::ERROR_NONE,
        Err(error) => error.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_round_trip() {
        for code in [
            codes::ERROR_UNKNOWN,
            codes::ERROR_INVALID_ACCESSOR,
            codes::ERROR_INVALID_SESSION,
            codes::ERROR_INVALID_DECRYPT_BUFFER,
            codes::ERROR_METHOD_NOT_IMPLEMENTED,
            codes::ERROR_INVALID_ARG,
            codes::ERROR_SERVER_INTERNAL_ERROR,
            codes::ERROR_BUSY_CANNOT_INITIALIZE,
        ] {
            let error = Error::from_status(code).unwrap_err();
            assert_eq!(error.code(), code);
        }
    }

    #[test]
    fn unknown_remote_codes_pass_through() {
        let error = Error::from_status(0xdead_beef).unwrap_err();
        assert!(matches!(error, Error::Remote(0xdead_beef)));
        assert_eq!(error.code(), 0xdead_beef);
    }

    #[test]
    fn timeout_is_a_generic_failure_on_the_c_side() {
        assert_eq!(Error::Timeout.code(), codes::ERROR_FAIL);
        assert_eq!(status_of(&Ok(())), codes::ERROR_NONE);
        assert_eq!(status_of(&Err(Error::InvalidArg)), codes::ERROR_INVALID_ARG);
    }
}
