// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use uuid::Uuid;

use crate::error::remote_error;
use crate::remote::{RemoteSystemExt, SessionRequest};
use crate::session::SessionCallbacks;
use crate::{Error, OpenCdmSession, Registry, Result};

struct SystemInner {
    id: Uuid,
    key_system: String,
    metadata: String,
    registry: Registry,
}

impl Drop for SystemInner {
    fn drop(&mut self) {
        self.registry
            .system_being_destructed(self.id, &self.key_system);
        debug!("Destroyed {} system {}", self.key_system, self.id);
    }
}

/// Handle to one key system of the DRM engine.
///
/// Created by [`Registry::create_system`]. Sessions remember which system
/// created them, but do not keep it alive: close them before dropping the
/// last system handle.
#[derive(Clone)]
pub struct OpenCdmSystem {
    inner: Arc<SystemInner>,
}

impl OpenCdmSystem {
    pub(crate) fn new(registry: Registry, key_system: &str, metadata: String) -> Self {
        Self {
            inner: Arc::new(SystemInner {
                id: Uuid::new_v4(),
                key_system: key_system.to_owned(),
                metadata,
                registry,
            }),
        }
    }

    /// Process-unique ID of this system handle.
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn key_system(&self) -> &str {
        &self.inner.key_system
    }

    /// Metadata reported by the DRM engine when the system was created.
    pub fn metadata(&self) -> &str {
        &self.inner.metadata
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn is_type_supported(&self, mime_type: &str) -> Result<()> {
        self.inner
            .registry
            .is_type_supported(&self.inner.key_system, mime_type)
    }

    /// Constructs a new session for this key system.
    pub fn create_session(
        &self,
        license_type: i32,
        init_data_type: &str,
        init_data: &[u8],
        cdm_data: &[u8],
        callbacks: Option<Arc<dyn SessionCallbacks>>,
    ) -> Result<OpenCdmSession> {
        let request = SessionRequest {
            key_system: &self.inner.key_system,
            license_type,
            init_data_type,
            init_data,
            cdm_data,
        };
        OpenCdmSession::create(&self.inner.registry, self.inner.id, &request, callbacks)
    }

    /// The session of this system holding usable `key_id`, waiting up to `timeout`.
    pub fn session(&self, key_id: &[u8], timeout: Duration) -> Option<OpenCdmSession> {
        self.inner.registry.find_session(key_id, timeout, Some(self))
    }

    pub fn set_server_certificate(&self, certificate: &[u8]) -> Result<()> {
        Error::from_status(
            self.inner
                .registry
                .accessor()?
                .set_server_certificate(&self.inner.key_system, certificate),
        )
    }

    fn ext(&self) -> Result<Arc<dyn RemoteSystemExt>> {
        self.inner
            .registry
            .accessor()?
            .system_ext()
            .ok_or(Error::MethodNotImplemented)
    }

    /// Current time of the DRM engine's secure clock, in seconds.
    pub fn drm_system_time(&self) -> Result<u64> {
        self.ext()?
            .drm_system_time(&self.inner.key_system)
            .map_err(remote_error)
    }

    pub fn ldl_session_limit(&self) -> Result<u32> {
        self.ext()?
            .ldl_session_limit(&self.inner.key_system)
            .map_err(remote_error)
    }

    pub fn is_secure_stop_enabled(&self) -> Result<bool> {
        Ok(self.ext()?.is_secure_stop_enabled(&self.inner.key_system))
    }

    pub fn enable_secure_stop(&self, enable: bool) -> Result<()> {
        Error::from_status(
            self.ext()?
                .enable_secure_stop(&self.inner.key_system, enable),
        )
    }

    /// Clears all secure stops; returns how many were cleared.
    pub fn reset_secure_stop(&self) -> Result<u32> {
        self.ext()?
            .reset_secure_stop(&self.inner.key_system)
            .map_err(remote_error)
    }

    pub fn secure_stop_ids(&self) -> Result<Vec<Vec<u8>>> {
        self.ext()?
            .secure_stop_ids(&self.inner.key_system)
            .map_err(remote_error)
    }

    pub fn secure_stop(&self, session_id: &[u8]) -> Result<Vec<u8>> {
        self.ext()?
            .secure_stop(&self.inner.key_system, session_id)
            .map_err(remote_error)
    }

    pub fn commit_secure_stop(&self, session_id: &[u8], server_response: &[u8]) -> Result<()> {
        Error::from_status(self.ext()?.commit_secure_stop(
            &self.inner.key_system,
            session_id,
            server_response,
        ))
    }

    pub fn delete_key_store(&self) -> Result<()> {
        Error::from_status(self.ext()?.delete_key_store(&self.inner.key_system))
    }

    pub fn delete_secure_store(&self) -> Result<()> {
        Error::from_status(self.ext()?.delete_secure_store(&self.inner.key_system))
    }

    pub fn key_store_hash(&self) -> Result<Vec<u8>> {
        self.ext()?
            .key_store_hash(&self.inner.key_system)
            .map_err(remote_error)
    }

    pub fn secure_store_hash(&self) -> Result<Vec<u8>> {
        self.ext()?
            .secure_store_hash(&self.inner.key_system)
            .map_err(remote_error)
    }
}

impl std::fmt::Debug for OpenCdmSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenCdmSystem")
            .field("id", &self.inner.id)
            .field("key_system", &self.inner.key_system)
            .finish_non_exhaustive()
    }
}
