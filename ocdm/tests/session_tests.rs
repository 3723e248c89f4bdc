// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for sessions, systems and the session registry.
//!
//! Most tests run against the in-process loopback DRM engine, which decrypts
//! over real shared memory channels. A few use a minimal stub engine to
//! control session IDs and buffer names directly.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ocdm::config::DecryptSerialization;
use ocdm::loopback::{
    CHANNEL_CAPACITY, LICENSE_URL, LoopbackDrm, LoopbackTransport, encode_license,
};
use ocdm::remote::{
    OperationalCallback, RemoteAccessor, RemoteResult, RemoteSession, SessionNotifications,
    SessionRequest, Transport,
};
use ocdm::subsample::{SubsampleReader, encode_subsamples, gather, scatter};
use ocdm::{
    Error, KeyStatus, OcdmConfig, Registry, SampleInfo, SessionCallbacks, Status, SubSample,
    codes,
};
use tracing::info;

const CLEARKEY: &str = "org.w3.clearkey";
const KEY_ID: [u8; 16] = [
    0x10, 0x11, 0x12, 0x13, 0x20, 0x21, 0x30, 0x31, 0x40, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47,
];
const KEY: [u8; 3] = [0x0f, 0xf0, 0xaa];

/// Ensures logging is initialized only once across all tests.
static LOG_ONCE: std::sync::Once = std::sync::Once::new();

fn setup_logging() {
    LOG_ONCE.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::builder()
                    .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .init();
    });
}

fn setup_with(drm: Arc<LoopbackDrm>, config: OcdmConfig) -> (Registry, Arc<LoopbackTransport>) {
    setup_logging();
    let transport = Arc::new(LoopbackTransport::new(drm));
    let registry = Registry::connect(transport.clone(), config).unwrap();
    (registry, transport)
}

fn setup() -> (Registry, Arc<LoopbackTransport>) {
    setup_with(LoopbackDrm::new([CLEARKEY]), OcdmConfig::default())
}

fn xor_expected(data: &[u8]) -> Vec<u8> {
    data.iter()
        .enumerate()
        .map(|(i, byte)| byte ^ KEY[i % KEY.len()])
        .collect()
}

#[derive(Default)]
struct Recorder {
    challenges: Mutex<Vec<(String, Vec<u8>)>>,
    updated: Mutex<Vec<Vec<u8>>>,
    errors: Mutex<Vec<String>>,
    batches: AtomicUsize,
}

impl SessionCallbacks for Recorder {
    fn on_challenge(&self, url: &str, challenge: &[u8]) {
        self.challenges
            .lock()
            .unwrap()
            .push((url.to_owned(), challenge.to_vec()));
    }

    fn on_key_updated(&self, key_id: &[u8]) {
        self.updated.lock().unwrap().push(key_id.to_vec());
    }

    fn on_error(&self, message: &str) {
        self.errors.lock().unwrap().push(message.to_owned());
    }

    fn on_keys_updated(&self) {
        self.batches.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn licensed_session_decrypts_full_sample() {
    let (registry, _transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    session
        .update(&encode_license(&[(&KEY_ID, &KEY)]))
        .unwrap();

    let original: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let mut sample = original.clone();
    session
        .decrypt(&mut sample, Some(&SampleInfo::cenc(&[1; 16], &KEY_ID)), false, None)
        .unwrap();
    assert_eq!(sample, xor_expected(&original));
    info!("Decrypted {} bytes on {}", sample.len(), session.buffer_id());
}

#[test]
fn subsample_map_leaves_clear_bytes_untouched() {
    let (registry, _transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    session
        .update(&encode_license(&[(&KEY_ID, &KEY)]))
        .unwrap();

    let original = [1u8, 2, 3, 4, 5, 6, 7, 8];
    let info = SampleInfo::cenc(&[], &KEY_ID)
        .with_subsamples(vec![SubSample::new(2, 3), SubSample::new(3, 0)]);
    let mut sample = original;
    session.decrypt(&mut sample, Some(&info), false, None).unwrap();

    assert_eq!(sample[..2], original[..2]);
    assert_eq!(sample[2..5], xor_expected(&original[2..5])[..]);
    assert_eq!(sample[5..], original[5..]);
}

#[test]
fn gathered_payload_fills_the_channel_exactly() {
    let (registry, _transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    session
        .update(&encode_license(&[(&KEY_ID, &KEY)]))
        .unwrap();
    let reserved = registry.config().reserved_token_size;
    let encrypted = CHANNEL_CAPACITY - reserved;

    let original: Vec<u8> = (0..=255u8).cycle().take(encrypted + 2).collect();
    let map = encode_subsamples(&[SubSample::new(2, encrypted as u32)]);
    let mut reader = SubsampleReader::new(&map);
    let mut gathered = gather(&original, &mut reader, 1, reserved).unwrap();
    assert_eq!(gathered.data.len(), CHANNEL_CAPACITY);

    let info = SampleInfo::cenc(&[], &KEY_ID).with_subsamples(gathered.regions.clone());
    session
        .decrypt(gathered.payload_mut(), Some(&info), false, None)
        .unwrap();
    let mut sample = original.clone();
    scatter(&gathered.data, &mut reader, 1, &mut sample).unwrap();
    assert_eq!(sample[..2], original[..2]);
    assert_eq!(sample[2..], xor_expected(&original[2..])[..]);

    let mut oversized = vec![0u8; encrypted + 1];
    assert!(matches!(
        session.decrypt(&mut oversized, Some(&info), false, None),
        Err(Error::BufferTooSmall)
    ));
}

#[test]
fn unknown_key_surfaces_the_remote_status() {
    let (registry, _transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();

    let mut sample = [0u8; 32];
    let result = session.decrypt(&mut sample, Some(&SampleInfo::cenc(&[], &KEY_ID)), false, None);
    assert!(matches!(result, Err(Error::ServerInternalError)));
    assert_eq!(
        ocdm::status_of(&result),
        codes::ERROR_SERVER_INTERNAL_ERROR
    );
}

#[test]
fn sample_without_info_is_sent_clear() {
    let (registry, _transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();

    let mut sample = [9u8; 16];
    session.decrypt(&mut sample, None, false, None).unwrap();
    assert_eq!(sample, [9u8; 16]);
}

#[test]
fn wait_for_key_finds_the_owning_session() {
    let (registry, _transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let _other = system.create_session(0, "cenc", &[], &[], None).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    session
        .update(&encode_license(&[(&KEY_ID, &KEY)]))
        .unwrap();

    let found = registry.wait_for_key(&KEY_ID, Duration::ZERO, KeyStatus::Usable, None);
    assert_eq!(found.as_deref(), Some(session.id()));

    let by_system = system.session(&KEY_ID, Duration::ZERO).unwrap();
    assert_eq!(by_system.id(), session.id());
}

#[test]
fn wait_for_key_wakes_on_key_arrival() {
    let (registry, _transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();

    let waiter = {
        let registry = registry.clone();
        std::thread::spawn(move || {
            let start = Instant::now();
            let found =
                registry.wait_for_key(&KEY_ID, Duration::from_secs(10), KeyStatus::Usable, None);
            (found, start.elapsed())
        })
    };

    std::thread::sleep(Duration::from_millis(50));
    session
        .update(&encode_license(&[(&KEY_ID, &KEY)]))
        .unwrap();

    let (found, elapsed) = waiter.join().unwrap();
    assert_eq!(found.as_deref(), Some(session.id()));
    assert!(elapsed < Duration::from_secs(5));
}

#[test]
fn wait_for_key_times_out_without_false_positives() {
    let (registry, transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    transport
        .drm()
        .session(session.id())
        .unwrap()
        .report_key_status(&KEY_ID, KeyStatus::Expired);

    let timeout = Duration::from_millis(100);
    let start = Instant::now();
    let found = registry.wait_for_key(&KEY_ID, timeout, KeyStatus::Usable, None);
    let elapsed = start.elapsed();

    assert!(found.is_none());
    assert!(elapsed >= timeout);
    assert!(elapsed < timeout + Duration::from_secs(1));
    assert_eq!(
        registry
            .wait_for_key(&KEY_ID, Duration::ZERO, KeyStatus::Expired, None)
            .as_deref(),
        Some(session.id())
    );
}

#[test]
fn wait_for_key_honours_system_filter() {
    let (registry, _transport) = setup();
    let first = registry.create_system(CLEARKEY).unwrap();
    let second = registry.create_system(CLEARKEY).unwrap();
    let session = first.create_session(0, "cenc", &[], &[], None).unwrap();
    session
        .update(&encode_license(&[(&KEY_ID, &KEY)]))
        .unwrap();

    assert!(
        registry
            .wait_for_key(&KEY_ID, Duration::ZERO, KeyStatus::Usable, Some(&second))
            .is_none()
    );
    assert!(
        registry
            .wait_for_key(&KEY_ID, Duration::ZERO, KeyStatus::Usable, Some(&first))
            .is_some()
    );
}

#[test]
fn key_status_updates_overwrite_in_place() {
    let (registry, transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let recorder = Arc::new(Recorder::default());
    let session = system
        .create_session(0, "cenc", &[], &[], Some(recorder.clone()))
        .unwrap();
    let remote = transport.drm().session(session.id()).unwrap();

    assert_eq!(session.status(&KEY_ID), KeyStatus::StatusPending);
    assert!(!session.has_key_id(&KEY_ID));

    remote.report_key_status(&KEY_ID, KeyStatus::StatusPending);
    assert!(recorder.updated.lock().unwrap().is_empty());

    remote.report_key_status(&KEY_ID, KeyStatus::Usable);
    assert_eq!(session.status(&KEY_ID), KeyStatus::Usable);

    remote.report_key_status(&KEY_ID, KeyStatus::Expired);
    assert_eq!(session.status(&KEY_ID), KeyStatus::Expired);
    assert_eq!(session.keys().len(), 1);
    assert_eq!(recorder.updated.lock().unwrap().len(), 2);
    assert_eq!(recorder.batches.load(Ordering::SeqCst), 3);
}

#[test]
fn key_ids_match_in_either_guid_byte_order() {
    let (registry, transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    transport
        .drm()
        .session(session.id())
        .unwrap()
        .report_key_status(&KEY_ID, KeyStatus::Usable);

    let mut swapped = KEY_ID;
    swapped[0..4].reverse();
    swapped[4..6].reverse();
    swapped[6..8].reverse();
    assert_eq!(session.status(&swapped), KeyStatus::Usable);
}

#[test]
fn swapped_key_id_updates_the_existing_entry() {
    let (registry, transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    let remote = transport.drm().session(session.id()).unwrap();

    let mut swapped = KEY_ID;
    swapped[0..4].reverse();
    swapped[4..6].reverse();
    swapped[6..8].reverse();

    remote.report_key_status(&KEY_ID, KeyStatus::Usable);
    remote.report_key_status(&swapped, KeyStatus::Expired);

    assert_eq!(session.keys().len(), 1);
    assert_eq!(session.status(&KEY_ID), KeyStatus::Expired);
    assert_eq!(session.status(&swapped), KeyStatus::Expired);
}

#[test]
fn key_error_distinguishes_unknown_keys() {
    let (registry, transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    let remote = transport.drm().session(session.id()).unwrap();

    assert_eq!(session.key_error(&KEY_ID), None);
    remote.report_key_status(&KEY_ID, KeyStatus::Usable);
    assert_eq!(session.key_error(&KEY_ID), Some(0));
    remote.report_key_status(&KEY_ID, KeyStatus::HwError);
    assert_eq!(session.key_error(&KEY_ID), Some(KeyStatus::HwError as u32));
}

#[test]
fn callbacks_receive_messages_and_errors() {
    let (registry, transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let recorder = Arc::new(Recorder::default());
    let session = system
        .create_session(0, "cenc", b"pssh", &[], Some(recorder.clone()))
        .unwrap();

    assert_eq!(
        *recorder.challenges.lock().unwrap(),
        vec![(LICENSE_URL.to_owned(), b"pssh".to_vec())]
    );

    transport
        .drm()
        .session(session.id())
        .unwrap()
        .report_error(-2, 0x42, "output protection lost");
    assert_eq!(
        *recorder.errors.lock().unwrap(),
        vec!["output protection lost".to_owned()]
    );
    assert_eq!(session.system_error(), 0x42);
    let last = session.last_error().unwrap();
    assert_eq!((last.error, last.sys_error), (-2, 0x42));
}

#[test]
fn remove_releases_every_key() {
    let (registry, _transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    session
        .update(&encode_license(&[(&KEY_ID, &KEY)]))
        .unwrap();
    session.remove().unwrap();
    assert_eq!(session.status(&KEY_ID), KeyStatus::Released);
}

#[test]
fn malformed_license_is_rejected() {
    let (registry, _transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    assert!(matches!(
        session.update(&[16, 1, 2]),
        Err(Error::ServerInvalidMessage)
    ));
}

#[test]
fn dropping_the_last_handle_unregisters_and_revokes() {
    let (registry, transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    let id = session.id().to_owned();
    let remote = transport.drm().session(&id).unwrap();

    let clone = session.clone();
    drop(session);
    assert!(registry.session(&id).is_some());
    drop(clone);

    assert!(registry.session(&id).is_none());
    assert_eq!(registry.session_count(), 0);
    assert!(remote.is_revoked());
}

#[test]
fn session_controls_reach_the_engine() {
    let (registry, transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    let remote = transport.drm().session(session.id()).unwrap();

    session.load().unwrap();
    session.reset_output_protection().unwrap();
    session.set_parameter("hdcp", "2.2").unwrap();
    assert!(matches!(
        session.set_parameter("", "x"),
        Err(Error::InvalidArg)
    ));
    assert_eq!(
        remote.parameters(),
        vec![("hdcp".to_owned(), "2.2".to_owned())]
    );

    session.close().unwrap();
    assert!(remote.is_closed());
    assert!(matches!(session.load(), Err(Error::InvalidSession)));
}

#[test]
fn extended_operations_require_the_capability() {
    let (registry, _transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();

    assert!(matches!(
        session.set_drm_header(b"header"),
        Err(Error::MethodNotImplemented)
    ));
    assert!(matches!(
        session.challenge_data(false),
        Err(Error::MethodNotImplemented)
    ));
    assert!(matches!(
        system.drm_system_time(),
        Err(Error::MethodNotImplemented)
    ));
}

#[test]
fn extended_operations_with_the_capability() {
    let (registry, transport) = setup_with(
        LoopbackDrm::with_extensions([CLEARKEY]),
        OcdmConfig::default(),
    );
    let system = registry.create_system(CLEARKEY).unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
    let remote = transport.drm().session(session.id()).unwrap();
    let extension = remote.extension().unwrap();

    session.set_drm_header(b"header").unwrap();
    assert_eq!(extension.drm_header(), Some(b"header".to_vec()));
    session.select_key_id(&KEY_ID).unwrap();
    assert_eq!(extension.selected_key_id(), Some(KEY_ID.to_vec()));
    session.clean_decrypt_context().unwrap();
    assert_eq!(extension.selected_key_id(), None);
    assert!(session.challenge_data(true).unwrap().ends_with(b"-ldl"));
    session.cancel_challenge_data().unwrap();

    let stop_id = session.store_license_data(b"license").unwrap();
    assert_eq!(system.secure_stop_ids().unwrap(), vec![stop_id.clone()]);
    assert_eq!(system.secure_stop(&stop_id).unwrap(), b"license".to_vec());
    system.commit_secure_stop(&stop_id, b"ack").unwrap();
    assert!(system.secure_stop_ids().unwrap().is_empty());

    system.enable_secure_stop(true).unwrap();
    assert!(system.is_secure_stop_enabled().unwrap());
    assert_eq!(system.ldl_session_limit().unwrap(), 4);
    assert!(system.drm_system_time().unwrap() > 0);
    assert_eq!(system.key_store_hash().unwrap().len(), 8);
    system.delete_key_store().unwrap();
    assert_eq!(transport.drm().store().license_count(), 0);
}

#[test]
fn system_queries() {
    let (registry, transport) = setup();
    assert!(matches!(
        registry.create_system("com.example.unknown"),
        Err(Error::KeySystemNotSupported)
    ));
    let system = registry.create_system(CLEARKEY).unwrap();
    assert!(system.metadata().contains("loopback"));
    system.is_type_supported("video/mp4").unwrap();
    system.set_server_certificate(b"cert").unwrap();
    assert_eq!(transport.drm().server_certificate(), Some(b"cert".to_vec()));
    assert!(matches!(
        system.set_server_certificate(&[]),
        Err(Error::InvalidArg)
    ));
}

#[test]
fn lost_connection_invalidates_the_accessor() {
    let (registry, transport) = setup();
    let system = registry.create_system(CLEARKEY).unwrap();

    transport.set_operational(false);
    assert!(!registry.is_operational());
    assert!(matches!(
        system.create_session(0, "cenc", &[], &[], None),
        Err(Error::InvalidAccessor)
    ));

    transport.set_operational(true);
    assert!(registry.is_operational());
    system.create_session(0, "cenc", &[], &[], None).unwrap();
}

#[test]
fn unreachable_service_fails_to_connect() {
    setup_logging();
    let transport = Arc::new(LoopbackTransport::unreachable(LoopbackDrm::new([CLEARKEY])));
    assert!(matches!(
        Registry::connect(transport, OcdmConfig::default()),
        Err(Error::InvalidAccessor)
    ));
}

#[test]
fn per_session_serialization_decrypts_concurrently() {
    let config = OcdmConfig {
        decrypt_serialization: DecryptSerialization::PerSession,
        ..OcdmConfig::default()
    };
    let (registry, _transport) = setup_with(LoopbackDrm::new([CLEARKEY]), config);
    let system = registry.create_system(CLEARKEY).unwrap();

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let session = system.create_session(0, "cenc", &[], &[], None).unwrap();
            session
                .update(&encode_license(&[(&KEY_ID, &KEY)]))
                .unwrap();
            std::thread::spawn(move || {
                for round in 0..20u8 {
                    let original = vec![round; 512];
                    let mut sample = original.clone();
                    session
                        .decrypt(&mut sample, Some(&SampleInfo::cenc(&[], &KEY_ID)), false, None)
                        .unwrap();
                    assert_eq!(sample, xor_expected(&original));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
}

/// Minimal engine handing out sessions with a fixed ID and buffer name.
struct StubSession {
    id: String,
}

impl RemoteSession for StubSession {
    fn session_id(&self) -> String {
        self.id.clone()
    }
    fn buffer_id(&self) -> String {
        format!("/ocdm-missing-{}", uuid::Uuid::new_v4())
    }
    fn load(&self) -> Status {
        codes::ERROR_NONE
    }
    fn update(&self, _response: &[u8]) -> Status {
        codes::ERROR_NONE
    }
    fn remove(&self) -> Status {
        codes::ERROR_NONE
    }
    fn close(&self) -> Status {
        codes::ERROR_NONE
    }
    fn reset_output_protection(&self) -> Status {
        codes::ERROR_NONE
    }
    fn set_parameter(&self, _name: &str, _value: &str) -> Status {
        codes::ERROR_NONE
    }
    fn error(&self) -> Status {
        codes::ERROR_NONE
    }
    fn revoke(&self, _sink: &Arc<dyn SessionNotifications>) {}
}

struct StubAccessor;

impl RemoteAccessor for StubAccessor {
    fn is_type_supported(&self, _key_system: &str, _mime_type: &str) -> Status {
        codes::ERROR_NONE
    }
    fn metadata(&self, _key_system: &str) -> RemoteResult<String> {
        Ok(String::new())
    }
    fn create_session(
        &self,
        _request: &SessionRequest<'_>,
        _sink: Arc<dyn SessionNotifications>,
    ) -> RemoteResult<Arc<dyn RemoteSession>> {
        Ok(Arc::new(StubSession {
            id: "fixed".to_owned(),
        }))
    }
    fn set_server_certificate(&self, _key_system: &str, _certificate: &[u8]) -> Status {
        codes::ERROR_NONE
    }
}

struct StubTransport;

impl Transport for StubTransport {
    fn open(&self, _timeout: Duration, _connector: &str, _name: &str) -> bool {
        true
    }
    fn interface(&self) -> Option<Arc<dyn RemoteAccessor>> {
        Some(Arc::new(StubAccessor))
    }
    fn close(&self, _timeout: Duration) {}
    fn set_operational_callback(&self, _callback: OperationalCallback) {}
}

fn stub_registry() -> Registry {
    setup_logging();
    Registry::connect(Arc::new(StubTransport), OcdmConfig::default()).unwrap()
}

#[test]
fn zero_length_decrypt_never_touches_the_channel() {
    let registry = stub_registry();
    let system = registry.create_system("stub").unwrap();
    let session = system.create_session(0, "cenc", &[], &[], None).unwrap();

    let mut empty: [u8; 0] = [];
    session
        .decrypt(&mut empty, Some(&SampleInfo::cenc(&[], &KEY_ID)), false, None)
        .unwrap();

    // The buffer does not exist, so anything non-empty fails to attach.
    let mut sample = [0u8; 4];
    assert!(session.decrypt(&mut sample, None, false, None).is_err());
}

#[test]
fn duplicate_session_ids_keep_the_first_registration() {
    let registry = stub_registry();
    let system = registry.create_system("stub").unwrap();
    let first = system.create_session(0, "cenc", &[], &[], None).unwrap();
    let second = system.create_session(0, "cenc", &[], &[], None).unwrap();
    assert_eq!(first.id(), second.id());

    let resolved = registry.session("fixed").unwrap();
    assert_eq!(resolved.buffer_id(), first.buffer_id());
    drop(resolved);

    drop(second);
    let resolved = registry.session("fixed").unwrap();
    assert_eq!(resolved.buffer_id(), first.buffer_id());
    drop(resolved);

    drop(first);
    assert!(registry.session("fixed").is_none());
}
