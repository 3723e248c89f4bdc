// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! CDM sessions.
//!
//! An [`OpenCdmSession`] owns one content session inside the DRM engine: the
//! license exchange (`load`/`update`/`remove`/`close`), the key statuses the
//! engine reports for it, and the shared memory channel its samples are
//! decrypted through. Handles are reference counted; dropping the last one
//! unregisters the session, revokes its notification sink and unmaps the
//! channel.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::config::DecryptSerialization;
use crate::error::remote_error;
use crate::exchange::DataExchange;
use crate::remote::{RemoteSession, RemoteSessionExt, SessionNotifications, SessionRequest};
use crate::{
    CapsParser, Error, KeyId, KeyStatus, MediaProperties, Registry, Result, SampleInfo, Status,
};

/// Application callbacks of a session. Every method defaults to doing nothing.
pub trait SessionCallbacks: Send + Sync {
    /// A license request (or other message) for the license server.
    fn on_challenge(&self, _url: &str, _challenge: &[u8]) {}

    /// A key changed to a non-pending status.
    fn on_key_updated(&self, _key_id: &[u8]) {}

    fn on_error(&self, _message: &str) {}

    /// The DRM engine finished a batch of key status updates.
    fn on_keys_updated(&self) {}
}

/// Last error the DRM engine reported through the notification sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionError {
    pub error: i16,
    pub sys_error: Status,
    pub message: String,
}

/// Notification sink handed to the DRM engine.
pub(crate) struct SessionEvents {
    keys: Mutex<Vec<(KeyId, KeyStatus)>>,
    last_error: Mutex<Option<SessionError>>,
    callbacks: Option<Arc<dyn SessionCallbacks>>,
    registry: Registry,
}

impl SessionEvents {
    fn new(registry: Registry, callbacks: Option<Arc<dyn SessionCallbacks>>) -> Self {
        Self {
            keys: Mutex::new(Vec::new()),
            last_error: Mutex::new(None),
            callbacks,
            registry,
        }
    }

    fn keys(&self) -> std::sync::MutexGuard<'_, Vec<(KeyId, KeyStatus)>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn status(&self, key_id: &[u8]) -> Option<KeyStatus> {
        self.keys()
            .iter()
            .find(|(id, _)| id.matches(key_id))
            .map(|&(_, status)| status)
    }
}

impl SessionNotifications for SessionEvents {
    fn on_key_message(&self, url: &str, challenge: &[u8]) {
        trace!("Key message for {url} ({} bytes)", challenge.len());
        if let Some(callbacks) = &self.callbacks {
            callbacks.on_challenge(url, challenge);
        }
    }

    fn on_key_status_update(&self, key_id: &[u8], status: KeyStatus) {
        {
            let mut keys = self.keys();
            match keys.iter_mut().find(|(id, _)| id.matches(key_id)) {
                Some(entry) => entry.1 = status,
                None => keys.push((KeyId::new(key_id), status)),
            }
        }
        debug!("Key {} is now {status:?}", KeyId::new(key_id));

        if !status.is_pending()
            && let Some(callbacks) = &self.callbacks
        {
            callbacks.on_key_updated(key_id);
        }
        self.registry.key_update();
    }

    fn on_key_statuses_updated(&self) {
        if let Some(callbacks) = &self.callbacks {
            callbacks.on_keys_updated();
        }
    }

    fn on_error(&self, error: i16, sys_error: Status, message: &str) {
        warn!("DRM error {error} (system error {sys_error:#x}): {message}");
        *self
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(SessionError {
            error,
            sys_error,
            message: message.to_owned(),
        });
        if let Some(callbacks) = &self.callbacks {
            callbacks.on_error(message);
        }
    }
}

pub(crate) struct SessionInner {
    id: String,
    buffer_id: String,
    key_system: String,
    system_id: Uuid,
    remote: Arc<dyn RemoteSession>,
    extended: Option<Arc<dyn RemoteSessionExt>>,
    events: Arc<SessionEvents>,
    exchange: Mutex<Option<Arc<DataExchange>>>,
    decrypt_lock: Arc<Mutex<()>>,
    caps_parser: Mutex<CapsParser>,
    registry: Registry,
}

impl SessionInner {
    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn system_id(&self) -> Uuid {
        self.system_id
    }

    pub(crate) fn status(&self, key_id: &[u8]) -> KeyStatus {
        self.events
            .status(key_id)
            .unwrap_or(KeyStatus::StatusPending)
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.registry.remove_session(&self.id, self as *const SessionInner);
        let sink: Arc<dyn SessionNotifications> = self.events.clone();
        self.remote.revoke(&sink);
        debug!("Released session {}", self.id);
    }
}

/// Handle to a CDM session.
///
/// Cloning the handle adds a reference; the session is released when the
/// last handle is dropped.
#[derive(Clone)]
pub struct OpenCdmSession {
    inner: Arc<SessionInner>,
}

impl OpenCdmSession {
    /// Constructs a session in the DRM engine and registers it.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidAccessor`] if the DRM service is not reachable
    /// - [`Error::InvalidSession`] if the engine returns no usable session
    /// - the engine's own error when it refuses the request
    pub(crate) fn create(
        registry: &Registry,
        system_id: Uuid,
        request: &SessionRequest<'_>,
        callbacks: Option<Arc<dyn SessionCallbacks>>,
    ) -> Result<Self> {
        let accessor = registry.accessor()?;
        let events = Arc::new(SessionEvents::new(registry.clone(), callbacks));
        let remote = accessor
            .create_session(request, events.clone())
            .map_err(remote_error)?;

        let id = remote.session_id();
        if id.is_empty() {
            warn!("DRM engine returned a session without an ID");
            return Err(Error::InvalidSession);
        }

        let decrypt_lock = match registry.config().decrypt_serialization {
            DecryptSerialization::Global => registry.decrypt_lock(),
            DecryptSerialization::PerSession => Arc::new(Mutex::new(())),
        };

        let inner = Arc::new(SessionInner {
            buffer_id: remote.buffer_id(),
            key_system: request.key_system.to_owned(),
            extended: remote.extended(),
            id,
            system_id,
            remote,
            events,
            exchange: Mutex::new(None),
            decrypt_lock,
            caps_parser: Mutex::new(CapsParser::new()),
            registry: registry.clone(),
        });
        registry.add_session(&inner);
        debug!("Created {} session {}", inner.key_system, inner.id);
        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Arc<SessionInner>) -> Self {
        Self { inner }
    }

    /// Session ID assigned by the DRM engine.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Name of the session's decrypt channel.
    pub fn buffer_id(&self) -> &str {
        &self.inner.buffer_id
    }

    pub fn key_system(&self) -> &str {
        &self.inner.key_system
    }

    /// ID of the [`crate::OpenCdmSystem`] that created this session.
    pub fn system_id(&self) -> Uuid {
        self.inner.system_id
    }

    /// Status of `key_id`; [`KeyStatus::StatusPending`] for keys never reported.
    pub fn status(&self, key_id: &[u8]) -> KeyStatus {
        self.inner.status(key_id)
    }

    pub fn has_key_id(&self, key_id: &[u8]) -> bool {
        self.inner.events.status(key_id).is_some()
    }

    /// Snapshot of every key the engine reported for this session.
    pub fn keys(&self) -> Vec<(KeyId, KeyStatus)> {
        self.inner.events.keys().clone()
    }

    /// Error code of `key_id`.
    ///
    /// Returns `None` for a key this session never heard of, `Some(0)` for a
    /// key without error, and the raw status for a key in an error status.
    pub fn key_error(&self, key_id: &[u8]) -> Option<u32> {
        self.inner
            .events
            .status(key_id)
            .map(|status| if status.is_error() { status as u32 } else { 0 })
    }

    /// Last error code the DRM engine holds for this session.
    pub fn system_error(&self) -> Status {
        self.inner.remote.error()
    }

    /// Last error delivered through the notification sink.
    pub fn last_error(&self) -> Option<SessionError> {
        self.inner
            .events
            .last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn load(&self) -> Result<()> {
        Error::from_status(self.inner.remote.load())
    }

    /// Hands the license server's response to the DRM engine.
    pub fn update(&self, response: &[u8]) -> Result<()> {
        Error::from_status(self.inner.remote.update(response))
    }

    pub fn remove(&self) -> Result<()> {
        Error::from_status(self.inner.remote.remove())
    }

    /// Closes the session in the DRM engine. The handle stays valid until dropped.
    pub fn close(&self) -> Result<()> {
        Error::from_status(self.inner.remote.close())
    }

    pub fn reset_output_protection(&self) -> Result<()> {
        Error::from_status(self.inner.remote.reset_output_protection())
    }

    pub fn set_parameter(&self, name: &str, value: &str) -> Result<()> {
        Error::from_status(self.inner.remote.set_parameter(name, value))
    }

    fn extended(&self) -> Result<&Arc<dyn RemoteSessionExt>> {
        self.inner.extended.as_ref().ok_or_else(|| {
            warn!("Session {} has no extended capability", self.inner.id);
            Error::MethodNotImplemented
        })
    }

    pub fn set_drm_header(&self, header: &[u8]) -> Result<()> {
        Error::from_status(self.extended()?.set_drm_header(header))
    }

    pub fn challenge_data(&self, is_ldl: bool) -> Result<Vec<u8>> {
        self.extended()?
            .challenge_data(is_ldl)
            .map_err(remote_error)
    }

    pub fn cancel_challenge_data(&self) -> Result<()> {
        Error::from_status(self.extended()?.cancel_challenge_data())
    }

    /// Stores a license persistently; returns its secure stop ID.
    pub fn store_license_data(&self, license: &[u8]) -> Result<Vec<u8>> {
        self.extended()?
            .store_license_data(license)
            .map_err(remote_error)
    }

    pub fn select_key_id(&self, key_id: &[u8]) -> Result<()> {
        Error::from_status(self.extended()?.select_key_id(key_id))
    }

    pub fn clean_decrypt_context(&self) -> Result<()> {
        Error::from_status(self.extended()?.clean_decrypt_context())
    }

    /// Attaches the decrypt channel on first use.
    fn exchange(&self) -> Result<Arc<DataExchange>> {
        let mut exchange = self
            .inner
            .exchange
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(exchange) = exchange.as_ref() {
            return Ok(exchange.clone());
        }
        let config = self.inner.registry.config();
        let attached = Arc::new(DataExchange::attach(
            &self.inner.buffer_id,
            self.inner.decrypt_lock.clone(),
            config.decrypt_timeout(),
            config.reserved_token_size,
        )?);
        *exchange = Some(attached.clone());
        Ok(attached)
    }

    /// Decrypts `data` in place through the session's channel.
    ///
    /// `info` of `None` sends the sample without encryption metadata. An
    /// empty `data` succeeds immediately without touching the channel.
    pub fn decrypt(
        &self,
        data: &mut [u8],
        info: Option<&SampleInfo>,
        init_with_last_15: bool,
        properties: Option<&MediaProperties>,
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let result = self
            .exchange()
            .and_then(|exchange| exchange.decrypt(data, info, init_with_last_15, properties));
        if let Err(error) = &result {
            warn!("Decrypt on session {} failed: {error}", self.inner.id);
        }
        result
    }

    /// Runs the secure buffer transform on a clear sample.
    pub fn transform_clear(&self, data: &mut [u8]) -> Result<()> {
        self.inner.registry.secure_buffer().transform_clear(data)
    }

    /// Media properties parsed from a caps string, cached per session.
    pub fn media_properties_from_caps(&self, caps: &str) -> MediaProperties {
        let mut parser = self
            .inner
            .caps_parser
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        parser.parse(caps);
        parser.media_properties()
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }
}

impl std::fmt::Debug for OpenCdmSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenCdmSession")
            .field("id", &self.inner.id)
            .field("key_system", &self.inner.key_system)
            .finish_non_exhaustive()
    }
}
