// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! The process-wide session registry.
//!
//! This module provides [`Registry`], the entry point of the client. A
//! registry owns the connection to the DRM service, tracks every live
//! [`OpenCdmSession`] by session ID and lets callers that only know a key ID
//! find the session holding that key, waiting for it to arrive if needed.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::remote::{RemoteAccessor, Transport};
use crate::session::SessionInner;
use crate::svp::{DynamicTransform, NoopTransform, SecureBufferTransform};
use crate::{Error, KeyStatus, OcdmConfig, OpenCdmSession, OpenCdmSystem, Result};

/// Interface name requested from the DRM service.
pub const ACCESSOR_INTERFACE: &str = "OpenCDMImplementation";

/// Wake-up signal for [`Registry::wait_for_key`].
///
/// Every key update bumps the generation. A waiter records the generation
/// before scanning and sleeps only while it is unchanged, so an update that
/// lands between the scan and the sleep is never missed.
#[derive(Default)]
struct KeySignal {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl KeySignal {
    fn current(&self) -> u64 {
        *self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self) {
        let mut generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// Sleeps until the generation moves past `seen` or `timeout` elapses.
    fn wait(&self, seen: u64, timeout: Duration) {
        let generation = self
            .generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .condvar
            .wait_timeout_while(generation, timeout, |generation| *generation == seen)
            .unwrap_or_else(PoisonError::into_inner);
    }
}

pub(crate) struct RegistryInner {
    transport: Arc<dyn Transport>,
    accessor: RwLock<Option<Arc<dyn RemoteAccessor>>>,
    sessions: Mutex<HashMap<String, Weak<SessionInner>>>,
    key_signal: KeySignal,
    decrypt_lock: Arc<Mutex<()>>,
    secure_buffer: Arc<dyn SecureBufferTransform>,
    config: OcdmConfig,
}

impl RegistryInner {
    fn operational(&self, up: bool) {
        let mut accessor = self.accessor.write().unwrap_or_else(PoisonError::into_inner);
        if up {
            *accessor = self.transport.interface();
            let state = if accessor.is_some() {
                "acquired"
            } else {
                "missing"
            };
            info!("DRM service operational (accessor {state})");
        } else {
            *accessor = None;
            warn!("DRM service connection lost");
        }
    }
}

impl Drop for RegistryInner {
    fn drop(&mut self) {
        debug!("Closing connection to {}", self.config.connector);
        self.transport.close(self.config.rpc_timeout());
    }
}

/// Process-wide registry of CDM sessions.
///
/// A registry is created once per process with [`Registry::connect`] and
/// handed to everything that needs it; it is cheaply cloneable and
/// thread-safe. Sessions keep the registry alive, the registry only refers to
/// sessions weakly: an ID stays registered exactly as long as its session
/// lives.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// use ocdm::loopback::{LoopbackDrm, LoopbackTransport};
/// use ocdm::{KeyStatus, OcdmConfig, Registry};
///
/// # fn main() -> Result<(), ocdm::Error> {
/// let drm = LoopbackDrm::new(["org.w3.clearkey"]);
/// let registry = Registry::connect(Arc::new(LoopbackTransport::new(drm)), OcdmConfig::default())?;
///
/// let key_id = [0x11u8; 16];
/// match registry.wait_for_key(&key_id, Duration::from_millis(100), KeyStatus::Usable, None) {
///     Some(session_id) => println!("Key held by {session_id}"),
///     None => println!("No session has the key yet"),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    /// Connects to the DRM service using the secure buffer transform named by
    /// `config` (none when unset).
    ///
    /// # Errors
    ///
    /// - [`Error::LibLoading`] if `config.secure_buffer_library` cannot be loaded
    /// - [`Error::InvalidAccessor`] if the service cannot be reached
    pub fn connect(transport: Arc<dyn Transport>, config: OcdmConfig) -> Result<Self> {
        let secure_buffer: Arc<dyn SecureBufferTransform> = match &config.secure_buffer_library {
            Some(path) => Arc::new(DynamicTransform::load(path)?),
            None => Arc::new(NoopTransform),
        };
        Self::connect_with(transport, config, secure_buffer)
    }

    /// Connects to the DRM service with an explicit secure buffer transform.
    ///
    /// Opens `config.connector`, requests the accessor interface and
    /// subscribes to connection changes: when the service goes away the
    /// accessor is dropped and remote calls fail with
    /// [`Error::InvalidAccessor`] until it comes back.
    pub fn connect_with(
        transport: Arc<dyn Transport>,
        config: OcdmConfig,
        secure_buffer: Arc<dyn SecureBufferTransform>,
    ) -> Result<Self> {
        if !transport.open(config.rpc_timeout(), &config.connector, ACCESSOR_INTERFACE) {
            error!("Could not open {}", config.connector);
            return Err(Error::InvalidAccessor);
        }
        let Some(accessor) = transport.interface() else {
            error!("{} does not expose {ACCESSOR_INTERFACE}", config.connector);
            transport.close(config.rpc_timeout());
            return Err(Error::InvalidAccessor);
        };

        let inner = Arc::new(RegistryInner {
            transport: transport.clone(),
            accessor: RwLock::new(Some(accessor)),
            sessions: Mutex::new(HashMap::new()),
            key_signal: KeySignal::default(),
            decrypt_lock: Arc::new(Mutex::new(())),
            secure_buffer,
            config,
        });

        let weak = Arc::downgrade(&inner);
        transport.set_operational_callback(Box::new(move |up| {
            if let Some(inner) = weak.upgrade() {
                inner.operational(up);
            }
        }));

        debug!("Connected to {}", inner.config.connector);
        Ok(Self { inner })
    }

    pub fn config(&self) -> &OcdmConfig {
        &self.inner.config
    }

    /// Whether the DRM service is currently reachable.
    pub fn is_operational(&self) -> bool {
        self.inner
            .accessor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub(crate) fn accessor(&self) -> Result<Arc<dyn RemoteAccessor>> {
        self.inner
            .accessor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(Error::InvalidAccessor)
    }

    /// Checks whether `key_system` can play content of `mime_type`.
    pub fn is_type_supported(&self, key_system: &str, mime_type: &str) -> Result<()> {
        Error::from_status(self.accessor()?.is_type_supported(key_system, mime_type))
    }

    /// Free-form description of `key_system` reported by the DRM engine.
    pub fn metadata(&self, key_system: &str) -> Result<String> {
        self.accessor()?
            .metadata(key_system)
            .map_err(crate::error::remote_error)
    }

    /// Creates a system handle for `key_system`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeySystemNotSupported`] if the DRM engine does not
    /// know the key system.
    pub fn create_system(&self, key_system: &str) -> Result<OpenCdmSystem> {
        let accessor = self.accessor()?;
        if accessor.is_type_supported(key_system, "") != 0 {
            return Err(Error::KeySystemNotSupported);
        }
        let metadata = accessor.metadata(key_system).unwrap_or_default();
        Ok(OpenCdmSystem::new(self.clone(), key_system, metadata))
    }

    /// Signals waiters in [`Registry::wait_for_key`] that some key changed.
    pub fn key_update(&self) {
        self.inner.key_signal.notify();
    }

    fn live_sessions(&self) -> Vec<Arc<SessionInner>> {
        self.inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn scan(
        &self,
        key_id: &[u8],
        wanted: KeyStatus,
        system: Option<Uuid>,
    ) -> Option<Arc<SessionInner>> {
        // Sessions are released outside the registry lock, since dropping
        // the last handle unregisters the session.
        self.live_sessions().into_iter().find(|session| {
            system.is_none_or(|id| session.system_id() == id) && session.status(key_id) == wanted
        })
    }

    fn wait_for_session(
        &self,
        key_id: &[u8],
        timeout: Duration,
        wanted: KeyStatus,
        system: Option<Uuid>,
    ) -> Option<Arc<SessionInner>> {
        let deadline = Instant::now() + timeout;
        loop {
            let seen = self.inner.key_signal.current();
            if let Some(session) = self.scan(key_id, wanted, system) {
                return Some(session);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.inner.key_signal.wait(seen, deadline - now);
        }
    }

    /// Waits until some session reports `wanted` for `key_id`.
    ///
    /// Scans all registered sessions, optionally only those created by
    /// `system`, and returns the ID of the first one whose status for the key
    /// equals `wanted`. Otherwise sleeps until the next key update and scans
    /// again, until `timeout` (measured once, from entry) has passed.
    ///
    /// # Returns
    ///
    /// The session ID, or `None` once the deadline passed without a match.
    pub fn wait_for_key(
        &self,
        key_id: &[u8],
        timeout: Duration,
        wanted: KeyStatus,
        system: Option<&OpenCdmSystem>,
    ) -> Option<String> {
        self.wait_for_session(key_id, timeout, wanted, system.map(OpenCdmSystem::id))
            .map(|session| session.id().to_owned())
    }

    /// Like [`Registry::wait_for_key`] for a usable key, returning the session.
    pub fn find_session(
        &self,
        key_id: &[u8],
        timeout: Duration,
        system: Option<&OpenCdmSystem>,
    ) -> Option<OpenCdmSession> {
        self.wait_for_session(key_id, timeout, KeyStatus::Usable, system.map(OpenCdmSystem::id))
            .map(OpenCdmSession::from_inner)
    }

    /// The live session registered under `session_id`.
    pub fn session(&self, session_id: &str) -> Option<OpenCdmSession> {
        let session = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .and_then(Weak::upgrade);
        session.map(OpenCdmSession::from_inner)
    }

    /// Number of live registered sessions.
    pub fn session_count(&self) -> usize {
        self.live_sessions().len()
    }

    /// Registers `session`. A session ID that is already taken keeps its
    /// first owner.
    pub(crate) fn add_session(&self, session: &Arc<SessionInner>) -> bool {
        let mut sessions = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = sessions.get(session.id())
            && existing.strong_count() > 0
        {
            warn!("Session {} is already registered, ignoring duplicate", session.id());
            return false;
        }
        sessions.insert(session.id().to_owned(), Arc::downgrade(session));
        debug!("Registered session {}", session.id());
        true
    }

    /// Unregisters `session_id` if it still belongs to `session`.
    pub(crate) fn remove_session(&self, session_id: &str, session: *const SessionInner) {
        let mut sessions = self
            .inner
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sessions
            .get(session_id)
            .is_some_and(|registered| std::ptr::eq(registered.as_ptr(), session))
        {
            sessions.remove(session_id);
            debug!("Unregistered session {session_id}");
        }
    }

    /// Warns about sessions still alive when their system goes away.
    pub(crate) fn system_being_destructed(&self, system_id: Uuid, key_system: &str) {
        for session in self.live_sessions() {
            if session.system_id() == system_id {
                warn!(
                    "Session {} outlives its {key_system} system; close sessions before destroying the system",
                    session.id()
                );
            }
        }
    }

    pub(crate) fn decrypt_lock(&self) -> Arc<Mutex<()>> {
        self.inner.decrypt_lock.clone()
    }

    pub(crate) fn secure_buffer(&self) -> &Arc<dyn SecureBufferTransform> {
        &self.inner.secure_buffer
    }
}
