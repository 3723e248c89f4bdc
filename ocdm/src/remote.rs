// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Interfaces of the out-of-process DRM service.
//!
//! The RPC transport, the DRM engine behind it and the sessions it hands out
//! are external collaborators. These traits describe the contract this crate
//! relies on; a real deployment implements them on top of its IPC framework,
//! tests use the in-process back-end in [`crate::loopback`].
//!
//! Remote calls report a raw [`Status`], `0` meaning success. Callers convert
//! it with [`crate::Error::from_status`].

use std::sync::Arc;
use std::time::Duration;

use crate::{KeyStatus, Status};

/// Result of a remote call producing a value.
pub type RemoteResult<T> = core::result::Result<T, Status>;

/// Callback invoked with `true` when the service becomes reachable and
/// `false` when the connection drops.
pub type OperationalCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Connection to the DRM service process.
pub trait Transport: Send + Sync {
    /// Opens `connector` and requests the interface `name`.
    fn open(&self, timeout: Duration, connector: &str, name: &str) -> bool;

    /// The service's accessor object, while connected.
    fn interface(&self) -> Option<Arc<dyn RemoteAccessor>>;

    fn close(&self, timeout: Duration);

    fn set_operational_callback(&self, callback: OperationalCallback);
}

/// Parameters of a new session.
#[derive(Debug, Clone, Copy)]
pub struct SessionRequest<'a> {
    pub key_system: &'a str,
    pub license_type: i32,
    pub init_data_type: &'a str,
    pub init_data: &'a [u8],
    pub cdm_data: &'a [u8],
}

/// The DRM service's top-level object.
pub trait RemoteAccessor: Send + Sync {
    fn is_type_supported(&self, key_system: &str, mime_type: &str) -> Status;

    fn metadata(&self, key_system: &str) -> RemoteResult<String>;

    /// Creates a session that reports back through `sink`.
    fn create_session(
        &self,
        request: &SessionRequest<'_>,
        sink: Arc<dyn SessionNotifications>,
    ) -> RemoteResult<Arc<dyn RemoteSession>>;

    fn set_server_certificate(&self, key_system: &str, certificate: &[u8]) -> Status;

    /// System-level extended operations, when the DRM engine has them.
    fn system_ext(&self) -> Option<Arc<dyn RemoteSystemExt>> {
        None
    }
}

/// System-level operations of DRM engines with persistent license support.
pub trait RemoteSystemExt: Send + Sync {
    fn drm_system_time(&self, key_system: &str) -> RemoteResult<u64>;
    fn ldl_session_limit(&self, key_system: &str) -> RemoteResult<u32>;
    fn is_secure_stop_enabled(&self, key_system: &str) -> bool;
    fn enable_secure_stop(&self, key_system: &str, enable: bool) -> Status;
    /// Returns the number of secure stops cleared.
    fn reset_secure_stop(&self, key_system: &str) -> RemoteResult<u32>;
    fn secure_stop_ids(&self, key_system: &str) -> RemoteResult<Vec<Vec<u8>>>;
    fn secure_stop(&self, key_system: &str, session_id: &[u8]) -> RemoteResult<Vec<u8>>;
    fn commit_secure_stop(
        &self,
        key_system: &str,
        session_id: &[u8],
        server_response: &[u8],
    ) -> Status;
    fn delete_key_store(&self, key_system: &str) -> Status;
    fn delete_secure_store(&self, key_system: &str) -> Status;
    fn key_store_hash(&self, key_system: &str) -> RemoteResult<Vec<u8>>;
    fn secure_store_hash(&self, key_system: &str) -> RemoteResult<Vec<u8>>;
}

/// One content session inside the DRM engine.
pub trait RemoteSession: Send + Sync {
    fn session_id(&self) -> String;

    /// Name of the shared memory channel used to decrypt this session's samples.
    fn buffer_id(&self) -> String;

    fn load(&self) -> Status;
    fn update(&self, response: &[u8]) -> Status;
    fn remove(&self) -> Status;
    fn close(&self) -> Status;
    fn reset_output_protection(&self) -> Status;
    fn set_parameter(&self, name: &str, value: &str) -> Status;

    /// Last error reported by the DRM engine for this session.
    fn error(&self) -> Status;

    /// Stops delivering notifications to `sink`.
    fn revoke(&self, sink: &Arc<dyn SessionNotifications>);

    /// The extended capability, when the DRM engine has it.
    fn extended(&self) -> Option<Arc<dyn RemoteSessionExt>> {
        None
    }
}

/// Session operations of DRM engines with persistent license support.
pub trait RemoteSessionExt: Send + Sync {
    fn set_drm_header(&self, header: &[u8]) -> Status;
    fn challenge_data(&self, is_ldl: bool) -> RemoteResult<Vec<u8>>;
    fn cancel_challenge_data(&self) -> Status;
    /// Returns the secure stop id assigned to the stored license.
    fn store_license_data(&self, license: &[u8]) -> RemoteResult<Vec<u8>>;
    fn select_key_id(&self, key_id: &[u8]) -> Status;
    fn clean_decrypt_context(&self) -> Status;
}

/// Notifications the DRM engine delivers for a session.
pub trait SessionNotifications: Send + Sync {
    fn on_key_message(&self, url: &str, challenge: &[u8]);
    fn on_key_status_update(&self, key_id: &[u8], status: KeyStatus);
    fn on_key_statuses_updated(&self);
    fn on_error(&self, error: i16, sys_error: Status, message: &str);
}
