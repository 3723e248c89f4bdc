// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! In-process DRM service for tests and demos.
//!
//! [`LoopbackTransport`] and [`LoopbackDrm`] implement the [`crate::remote`]
//! traits without any IPC. Each session runs a decryptor thread serving its
//! own shared memory channel, so decrypts take the same path as with a real
//! out-of-process engine.
//!
//! Licenses are sequences of `[kid_len u8][kid][key_len u8][key]` records
//! (see [`encode_license`]). "Decryption" XORs the encrypted bytes with the
//! key, cycling over the key bytes across all encrypted regions of a sample.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, trace};
use uuid::Uuid;

use crate::codes::*;
use crate::exchange::{DecryptRequest, DecryptServer};
use crate::remote::{
    OperationalCallback, RemoteAccessor, RemoteResult, RemoteSession, RemoteSessionExt,
    RemoteSystemExt, SessionNotifications, SessionRequest, Transport,
};
use crate::{EncryptionScheme, KeyId, KeyStatus, Status};

/// Data capacity of each session's decrypt channel.
pub const CHANNEL_CAPACITY: usize = 1 << 20;

/// URL reported with key messages.
pub const LICENSE_URL: &str = "loopback://license";

/// Session limit reported for limited duration licenses.
pub const LDL_SESSION_LIMIT: u32 = 4;

const SERVE_INTERVAL: Duration = Duration::from_millis(20);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Packs `(key_id, key)` pairs into a loopback license.
pub fn encode_license<K: AsRef<[u8]>, V: AsRef<[u8]>>(keys: &[(K, V)]) -> Vec<u8> {
    let mut license = Vec::new();
    for (key_id, key) in keys {
        let (key_id, key) = (key_id.as_ref(), key.as_ref());
        license.push(key_id.len() as u8);
        license.extend_from_slice(key_id);
        license.push(key.len() as u8);
        license.extend_from_slice(key);
    }
    license
}

fn decode_license(mut license: &[u8]) -> Option<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut keys = Vec::new();
    while !license.is_empty() {
        let (key_id, rest) = split_record(license)?;
        let (key, rest) = split_record(rest)?;
        if key.is_empty() {
            return None;
        }
        keys.push((key_id.to_vec(), key.to_vec()));
        license = rest;
    }
    Some(keys)
}

fn split_record(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let (&length, rest) = data.split_first()?;
    (rest.len() >= length as usize).then(|| rest.split_at(length as usize))
}

fn hash_bytes<T: Hash>(value: &T) -> Vec<u8> {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish().to_be_bytes().to_vec()
}

/// XORs `data` with `key`, continuing the key position in `index`.
fn xor_with(data: &mut [u8], key: &[u8], index: &mut usize) {
    for byte in data {
        *byte ^= key[*index % key.len()];
        *index += 1;
    }
}

type KeyTable = Arc<Mutex<Vec<(KeyId, Vec<u8>)>>>;

fn serve_request(keys: &KeyTable, request: &mut DecryptRequest<'_>) -> Status {
    let info = request.sample_info();
    if info.scheme == EncryptionScheme::Clear {
        return ERROR_NONE;
    }
    let Some(key) = lock(keys)
        .iter()
        .find(|(id, _)| id.matches(&info.key_id))
        .map(|(_, key)| key.clone())
    else {
        debug!("No key {} in loopback session", KeyId::new(&info.key_id));
        return ERROR_SERVER_INTERNAL_ERROR;
    };

    let data = request.data_mut();
    let mut index = 0;
    if info.subsamples.is_empty() {
        xor_with(data, &key, &mut index);
        return ERROR_NONE;
    }
    let mut offset = 0;
    for entry in &info.subsamples {
        let start = offset + entry.clear_bytes as usize;
        let end = start + entry.encrypted_bytes as usize;
        let Some(region) = data.get_mut(start..end) else {
            return ERROR_INVALID_DECRYPT_BUFFER;
        };
        xor_with(region, &key, &mut index);
        offset = end;
    }
    ERROR_NONE
}

/// Transport to a [`LoopbackDrm`] living in the same process.
pub struct LoopbackTransport {
    drm: Arc<LoopbackDrm>,
    reachable: bool,
    connected: AtomicBool,
    callback: Mutex<Option<OperationalCallback>>,
}

impl LoopbackTransport {
    pub fn new(drm: Arc<LoopbackDrm>) -> Self {
        Self {
            drm,
            reachable: true,
            connected: AtomicBool::new(false),
            callback: Mutex::new(None),
        }
    }

    /// A transport whose `open` always fails.
    pub fn unreachable(drm: Arc<LoopbackDrm>) -> Self {
        Self {
            reachable: false,
            ..Self::new(drm)
        }
    }

    pub fn drm(&self) -> &Arc<LoopbackDrm> {
        &self.drm
    }

    /// Simulates the service going away (`false`) or coming back (`true`).
    pub fn set_operational(&self, up: bool) {
        self.connected.store(up, Ordering::SeqCst);
        if let Some(callback) = lock(&self.callback).as_ref() {
            callback(up);
        }
    }
}

impl Transport for LoopbackTransport {
    fn open(&self, _timeout: Duration, connector: &str, name: &str) -> bool {
        trace!("Opening {name} on {connector}");
        if self.reachable {
            self.connected.store(true, Ordering::SeqCst);
        }
        self.reachable
    }

    fn interface(&self) -> Option<Arc<dyn RemoteAccessor>> {
        let accessor: Arc<dyn RemoteAccessor> = self.drm.clone();
        self.connected.load(Ordering::SeqCst).then_some(accessor)
    }

    fn close(&self, _timeout: Duration) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn set_operational_callback(&self, callback: OperationalCallback) {
        *lock(&self.callback) = Some(callback);
    }
}

/// Secure stop and license store shared by a loopback engine's sessions.
#[derive(Default)]
pub struct LoopbackStore {
    secure_stop_enabled: AtomicBool,
    secure_stops: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
    licenses: Mutex<Vec<Vec<u8>>>,
}

impl LoopbackStore {
    /// Persists `license` and returns the ID of its secure stop.
    fn store(&self, license: &[u8]) -> Vec<u8> {
        let id = Uuid::new_v4().as_bytes().to_vec();
        lock(&self.licenses).push(license.to_vec());
        lock(&self.secure_stops).push((id.clone(), license.to_vec()));
        id
    }

    pub fn license_count(&self) -> usize {
        lock(&self.licenses).len()
    }
}

impl RemoteSystemExt for LoopbackStore {
    fn drm_system_time(&self, _key_system: &str) -> RemoteResult<u64> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .map_err(|_| ERROR_FAIL)
    }

    fn ldl_session_limit(&self, _key_system: &str) -> RemoteResult<u32> {
        Ok(LDL_SESSION_LIMIT)
    }

    fn is_secure_stop_enabled(&self, _key_system: &str) -> bool {
        self.secure_stop_enabled.load(Ordering::SeqCst)
    }

    fn enable_secure_stop(&self, _key_system: &str, enable: bool) -> Status {
        self.secure_stop_enabled.store(enable, Ordering::SeqCst);
        ERROR_NONE
    }

    fn reset_secure_stop(&self, _key_system: &str) -> RemoteResult<u32> {
        let mut stops = lock(&self.secure_stops);
        let cleared = stops.len() as u32;
        stops.clear();
        Ok(cleared)
    }

    fn secure_stop_ids(&self, _key_system: &str) -> RemoteResult<Vec<Vec<u8>>> {
        Ok(lock(&self.secure_stops)
            .iter()
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn secure_stop(&self, _key_system: &str, session_id: &[u8]) -> RemoteResult<Vec<u8>> {
        lock(&self.secure_stops)
            .iter()
            .find(|(id, _)| id == session_id)
            .map(|(_, payload)| payload.clone())
            .ok_or(ERROR_INVALID_ARG)
    }

    fn commit_secure_stop(
        &self,
        _key_system: &str,
        session_id: &[u8],
        _server_response: &[u8],
    ) -> Status {
        let mut stops = lock(&self.secure_stops);
        let before = stops.len();
        stops.retain(|(id, _)| id != session_id);
        if stops.len() == before {
            ERROR_INVALID_ARG
        } else {
            ERROR_NONE
        }
    }

    fn delete_key_store(&self, _key_system: &str) -> Status {
        lock(&self.licenses).clear();
        ERROR_NONE
    }

    fn delete_secure_store(&self, _key_system: &str) -> Status {
        lock(&self.secure_stops).clear();
        ERROR_NONE
    }

    fn key_store_hash(&self, _key_system: &str) -> RemoteResult<Vec<u8>> {
        Ok(hash_bytes(&*lock(&self.licenses)))
    }

    fn secure_store_hash(&self, _key_system: &str) -> RemoteResult<Vec<u8>> {
        Ok(hash_bytes(&*lock(&self.secure_stops)))
    }
}

/// Extended capability of a loopback session. Records what it is given.
pub struct LoopbackSessionExt {
    store: Arc<LoopbackStore>,
    drm_header: Mutex<Option<Vec<u8>>>,
    selected_key_id: Mutex<Option<Vec<u8>>>,
    challenge_pending: AtomicBool,
}

impl LoopbackSessionExt {
    pub fn drm_header(&self) -> Option<Vec<u8>> {
        lock(&self.drm_header).clone()
    }

    pub fn selected_key_id(&self) -> Option<Vec<u8>> {
        lock(&self.selected_key_id).clone()
    }
}

impl RemoteSessionExt for LoopbackSessionExt {
    fn set_drm_header(&self, header: &[u8]) -> Status {
        *lock(&self.drm_header) = Some(header.to_vec());
        ERROR_NONE
    }

    fn challenge_data(&self, is_ldl: bool) -> RemoteResult<Vec<u8>> {
        self.challenge_pending.store(true, Ordering::SeqCst);
        let mut challenge = b"loopback-challenge".to_vec();
        if is_ldl {
            challenge.extend_from_slice(b"-ldl");
        }
        Ok(challenge)
    }

    fn cancel_challenge_data(&self) -> Status {
        self.challenge_pending.store(false, Ordering::SeqCst);
        ERROR_NONE
    }

    fn store_license_data(&self, license: &[u8]) -> RemoteResult<Vec<u8>> {
        if license.is_empty() {
            return Err(ERROR_INVALID_ARG);
        }
        Ok(self.store.store(license))
    }

    fn select_key_id(&self, key_id: &[u8]) -> Status {
        *lock(&self.selected_key_id) = Some(key_id.to_vec());
        ERROR_NONE
    }

    fn clean_decrypt_context(&self) -> Status {
        *lock(&self.selected_key_id) = None;
        ERROR_NONE
    }
}

/// One session of a [`LoopbackDrm`].
pub struct LoopbackSession {
    id: String,
    buffer_id: String,
    sink: Mutex<Option<Arc<dyn SessionNotifications>>>,
    keys: KeyTable,
    parameters: Mutex<Vec<(String, String)>>,
    error: AtomicU32,
    closed: AtomicBool,
    extended: Option<Arc<LoopbackSessionExt>>,
    stop: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LoopbackSession {
    fn start(
        id: String,
        sink: Arc<dyn SessionNotifications>,
        extended: Option<Arc<LoopbackSessionExt>>,
    ) -> RemoteResult<Arc<Self>> {
        let buffer_id = format!("/ocdm-{}", Uuid::new_v4());
        let server = DecryptServer::create(&buffer_id, CHANNEL_CAPACITY).map_err(|error| {
            error!("Failed to create decrypt channel {buffer_id}: {error}");
            ERROR_OUT_OF_MEMORY
        })?;

        let keys = KeyTable::default();
        let stop = Arc::new(AtomicBool::new(false));
        let worker = {
            let keys = keys.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name(format!("decrypt-{id}"))
                .spawn(move || {
                    while !stop.load(Ordering::SeqCst) {
                        if let Err(error) = server.serve(SERVE_INTERVAL, |request| {
                            serve_request(&keys, request)
                        }) {
                            error!("Decryptor for {} stopped: {error}", server.name());
                            break;
                        }
                    }
                })
                .map_err(|error| {
                    error!("Failed to start decryptor thread: {error}");
                    ERROR_FAIL
                })?
        };

        Ok(Arc::new(Self {
            id,
            buffer_id,
            sink: Mutex::new(Some(sink)),
            keys,
            parameters: Mutex::new(Vec::new()),
            error: AtomicU32::new(ERROR_NONE),
            closed: AtomicBool::new(false),
            extended,
            stop,
            worker: Mutex::new(Some(worker)),
        }))
    }

    fn sink(&self) -> Option<Arc<dyn SessionNotifications>> {
        lock(&self.sink).clone()
    }

    /// Delivers a key status notification, as the engine would.
    pub fn report_key_status(&self, key_id: &[u8], status: KeyStatus) {
        if let Some(sink) = self.sink() {
            sink.on_key_status_update(key_id, status);
            sink.on_key_statuses_updated();
        }
    }

    /// Records and delivers a DRM error.
    pub fn report_error(&self, error: i16, sys_error: Status, message: &str) {
        self.error.store(sys_error, Ordering::SeqCst);
        if let Some(sink) = self.sink() {
            sink.on_error(error, sys_error, message);
        }
    }

    pub fn parameters(&self) -> Vec<(String, String)> {
        lock(&self.parameters).clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether the client side still receives notifications.
    pub fn is_revoked(&self) -> bool {
        lock(&self.sink).is_none()
    }

    pub fn extension(&self) -> Option<&Arc<LoopbackSessionExt>> {
        self.extended.as_ref()
    }

    fn check_open(&self) -> Status {
        if self.is_closed() {
            ERROR_INVALID_SESSION
        } else {
            ERROR_NONE
        }
    }
}

impl RemoteSession for LoopbackSession {
    fn session_id(&self) -> String {
        self.id.clone()
    }

    fn buffer_id(&self) -> String {
        self.buffer_id.clone()
    }

    fn load(&self) -> Status {
        self.check_open()
    }

    fn update(&self, response: &[u8]) -> Status {
        if self.is_closed() {
            return ERROR_INVALID_SESSION;
        }
        let Some(records) = decode_license(response) else {
            return ERROR_SERVER_INVALID_MESSAGE;
        };
        lock(&self.keys).extend(
            records
                .iter()
                .map(|(key_id, key)| (KeyId::new(key_id), key.clone())),
        );
        if let Some(sink) = self.sink() {
            for (key_id, _) in &records {
                sink.on_key_status_update(key_id, KeyStatus::Usable);
            }
            sink.on_key_statuses_updated();
        }
        ERROR_NONE
    }

    fn remove(&self) -> Status {
        let removed: Vec<KeyId> = lock(&self.keys).drain(..).map(|(id, _)| id).collect();
        if let Some(sink) = self.sink() {
            for key_id in &removed {
                sink.on_key_status_update(key_id.as_bytes(), KeyStatus::Released);
            }
            sink.on_key_statuses_updated();
        }
        ERROR_NONE
    }

    fn close(&self) -> Status {
        self.closed.store(true, Ordering::SeqCst);
        ERROR_NONE
    }

    fn reset_output_protection(&self) -> Status {
        self.check_open()
    }

    fn set_parameter(&self, name: &str, value: &str) -> Status {
        if name.is_empty() {
            return ERROR_INVALID_ARG;
        }
        lock(&self.parameters).push((name.to_owned(), value.to_owned()));
        ERROR_NONE
    }

    fn error(&self) -> Status {
        self.error.load(Ordering::SeqCst)
    }

    fn revoke(&self, _sink: &Arc<dyn SessionNotifications>) {
        *lock(&self.sink) = None;
    }

    fn extended(&self) -> Option<Arc<dyn RemoteSessionExt>> {
        self.extended
            .clone()
            .map(|extended| extended as Arc<dyn RemoteSessionExt>)
    }
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = lock(&self.worker).take()
            && worker.join().is_err()
        {
            error!("Decryptor thread of {} panicked", self.id);
        }
    }
}

/// In-process DRM engine.
pub struct LoopbackDrm {
    key_systems: Vec<String>,
    extended: bool,
    next_session: AtomicU32,
    sessions: Mutex<Vec<Weak<LoopbackSession>>>,
    certificate: Mutex<Option<Vec<u8>>>,
    store: Arc<LoopbackStore>,
}

impl LoopbackDrm {
    /// An engine supporting `key_systems`, without extended operations.
    pub fn new<I, S>(key_systems: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(key_systems, false)
    }

    /// An engine whose systems and sessions have the extended capability.
    pub fn with_extensions<I, S>(key_systems: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(key_systems, true)
    }

    fn build<I, S>(key_systems: I, extended: bool) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            key_systems: key_systems.into_iter().map(Into::into).collect(),
            extended,
            next_session: AtomicU32::new(1),
            sessions: Mutex::new(Vec::new()),
            certificate: Mutex::new(None),
            store: Arc::default(),
        })
    }

    fn supports(&self, key_system: &str) -> bool {
        self.key_systems.iter().any(|supported| supported == key_system)
    }

    /// The live session with `session_id`.
    pub fn session(&self, session_id: &str) -> Option<Arc<LoopbackSession>> {
        lock(&self.sessions)
            .iter()
            .filter_map(Weak::upgrade)
            .find(|session| session.id == session_id)
    }

    pub fn server_certificate(&self) -> Option<Vec<u8>> {
        lock(&self.certificate).clone()
    }

    pub fn store(&self) -> &Arc<LoopbackStore> {
        &self.store
    }
}

impl RemoteAccessor for LoopbackDrm {
    fn is_type_supported(&self, key_system: &str, _mime_type: &str) -> Status {
        if self.supports(key_system) {
            ERROR_NONE
        } else {
            ERROR_KEYSYSTEM_NOT_SUPPORTED
        }
    }

    fn metadata(&self, key_system: &str) -> RemoteResult<String> {
        if !self.supports(key_system) {
            return Err(ERROR_KEYSYSTEM_NOT_SUPPORTED);
        }
        Ok(serde_json::json!({
            "key_system": key_system,
            "engine": "loopback",
            "extended": self.extended,
        })
        .to_string())
    }

    fn create_session(
        &self,
        request: &SessionRequest<'_>,
        sink: Arc<dyn SessionNotifications>,
    ) -> RemoteResult<Arc<dyn RemoteSession>> {
        if !self.supports(request.key_system) {
            return Err(ERROR_KEYSYSTEM_NOT_SUPPORTED);
        }
        let id = format!(
            "loopback-{}",
            self.next_session.fetch_add(1, Ordering::SeqCst)
        );
        let extended = self.extended.then(|| {
            Arc::new(LoopbackSessionExt {
                store: self.store.clone(),
                drm_header: Mutex::new(None),
                selected_key_id: Mutex::new(None),
                challenge_pending: AtomicBool::new(false),
            })
        });
        let session = LoopbackSession::start(id, sink.clone(), extended)?;

        let mut sessions = lock(&self.sessions);
        sessions.retain(|session| session.strong_count() > 0);
        sessions.push(Arc::downgrade(&session));
        drop(sessions);

        if !request.init_data.is_empty() {
            sink.on_key_message(LICENSE_URL, request.init_data);
        }
        debug!("Loopback session {} on {}", session.id, session.buffer_id);
        Ok(session)
    }

    fn set_server_certificate(&self, key_system: &str, certificate: &[u8]) -> Status {
        if !self.supports(key_system) {
            return ERROR_KEYSYSTEM_NOT_SUPPORTED;
        }
        if certificate.is_empty() {
            return ERROR_INVALID_ARG;
        }
        *lock(&self.certificate) = Some(certificate.to_vec());
        ERROR_NONE
    }

    fn system_ext(&self) -> Option<Arc<dyn RemoteSystemExt>> {
        self.extended
            .then(|| self.store.clone() as Arc<dyn RemoteSystemExt>)
    }
}
