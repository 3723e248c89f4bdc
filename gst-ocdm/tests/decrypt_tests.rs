// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Decrypts GStreamer buffers through loopback sessions.

use std::sync::{Arc, OnceLock};

use gstreamer as gst;
use gstocdm::{decrypt, decrypt_buffer, opencdm_gstreamer_session_decrypt_buffer};
use ocdm::loopback::{CHANNEL_CAPACITY, LoopbackDrm, LoopbackTransport, encode_license};
use ocdm::subsample::encode_subsamples;
use ocdm::{Error, OcdmConfig, OpenCdmSession, OpenCdmSystem, Registry, SubSample, codes};
use tracing_test::traced_test;

const KEY: [u8; 3] = [0x5a, 0xa5, 0xff];

fn system() -> &'static OpenCdmSystem {
    static SYSTEM: OnceLock<OpenCdmSystem> = OnceLock::new();
    SYSTEM.get_or_init(|| {
        gst::init().unwrap();
        let drm = LoopbackDrm::new(["org.w3.clearkey"]);
        let registry =
            Registry::connect(Arc::new(LoopbackTransport::new(drm)), OcdmConfig::default())
                .unwrap();
        ocdm_capi::install(registry.clone());
        registry.create_system("org.w3.clearkey").unwrap()
    })
}

fn licensed_session(key_id: &[u8]) -> OpenCdmSession {
    let session = system().create_session(0, "cenc", &[], &[], None).unwrap();
    session
        .update(&encode_license(&[(key_id, &KEY[..])]))
        .unwrap();
    session
}

fn contents(buffer: &gst::Buffer) -> Vec<u8> {
    buffer.map_readable().unwrap().as_slice().to_vec()
}

/// XORs the encrypted ranges with the key, continuing across ranges.
fn expected(plain: &[u8], encrypted: &[std::ops::Range<usize>]) -> Vec<u8> {
    let mut out = plain.to_vec();
    let mut index = 0;
    for range in encrypted {
        for byte in &mut out[range.clone()] {
            *byte ^= KEY[index % KEY.len()];
            index += 1;
        }
    }
    out
}

#[test]
#[traced_test]
fn subsample_regions_are_gathered_and_scattered_back() {
    let key_id = [0xd1u8; 16];
    let session = licensed_session(&key_id);

    let plain: Vec<u8> = (0..40u8).collect();
    let mut buffer = gst::Buffer::from_mut_slice(plain.clone());
    let map = gst::Buffer::from_mut_slice(encode_subsamples(&[
        SubSample::new(5, 10),
        SubSample::new(0, 7),
        SubSample::new(8, 10),
    ]));
    let iv = gst::Buffer::from_slice([0u8; 16]);
    let kid = gst::Buffer::from_slice(key_id);

    decrypt(
        &session,
        buffer.make_mut(),
        Some(&map),
        3,
        Some(&iv),
        Some(&kid),
        false,
    )
    .unwrap();

    assert_eq!(contents(&buffer), expected(&plain, &[5..15, 15..22, 30..40]));
}

#[test]
fn gathered_sample_may_fill_the_channel_up_to_the_token() {
    let key_id = [0xd7u8; 16];
    let session = licensed_session(&key_id);
    let reserved = session.registry().config().reserved_token_size;
    let encrypted = CHANNEL_CAPACITY - reserved;

    let plain: Vec<u8> = (0..=255u8).cycle().take(encrypted + 4).collect();
    let mut buffer = gst::Buffer::from_mut_slice(plain.clone());
    let map = gst::Buffer::from_mut_slice(encode_subsamples(&[SubSample::new(4, encrypted as u32)]));
    let kid = gst::Buffer::from_slice(key_id);

    decrypt(&session, buffer.make_mut(), Some(&map), 1, None, Some(&kid), false).unwrap();
    assert_eq!(contents(&buffer), expected(&plain, &[4..encrypted + 4]));
}

#[test]
fn many_cenc_subsamples_fit_one_request() {
    let key_id = [0xd8u8; 16];
    let session = licensed_session(&key_id);

    let entries = vec![SubSample::new(2, 3); 300];
    let plain: Vec<u8> = (0..=255u8).cycle().take(300 * 5).collect();
    let mut buffer = gst::Buffer::from_mut_slice(plain.clone());
    let map = gst::Buffer::from_mut_slice(encode_subsamples(&entries));
    let kid = gst::Buffer::from_slice(key_id);

    decrypt(&session, buffer.make_mut(), Some(&map), 300, None, Some(&kid), false).unwrap();
    let encrypted: Vec<_> = (0..300).map(|i| i * 5 + 2..i * 5 + 5).collect();
    assert_eq!(contents(&buffer), expected(&plain, &encrypted));
}

#[test]
fn whole_buffer_is_one_region_without_a_map() {
    let key_id = [0xd2u8; 16];
    let session = licensed_session(&key_id);

    let plain = vec![0x11u8; 24];
    let mut buffer = gst::Buffer::from_mut_slice(plain.clone());
    let kid = gst::Buffer::from_slice(key_id);

    decrypt(&session, buffer.make_mut(), None, 0, None, Some(&kid), false).unwrap();
    assert_eq!(contents(&buffer), expected(&plain, &[0..24]));
}

#[test]
fn clear_samples_skip_the_channel() {
    let session = system().create_session(0, "cenc", &[], &[], None).unwrap();
    let plain = vec![0x42u8; 16];
    let mut buffer = gst::Buffer::from_mut_slice(plain.clone());

    decrypt(&session, buffer.make_mut(), None, 0, None, None, false).unwrap();
    assert_eq!(contents(&buffer), plain);
}

#[test]
fn unknown_key_leaves_the_error_code_of_the_engine() {
    let session = licensed_session(&[0xd3u8; 16]);
    let mut buffer = gst::Buffer::from_mut_slice(vec![0u8; 8]);
    let kid = gst::Buffer::from_slice([0xeeu8; 16]);

    let result = decrypt(&session, buffer.make_mut(), None, 0, None, Some(&kid), false);
    assert!(matches!(result, Err(Error::ServerInternalError)));
}

#[test]
fn protection_meta_drives_decrypt_buffer() {
    let key_id = [0xd4u8; 16];
    let session = licensed_session(&key_id);

    let plain: Vec<u8> = (100..132u8).collect();
    let mut buffer = gst::Buffer::from_mut_slice(plain.clone());
    let info = gst::Structure::builder("application/x-cenc")
        .field("cipher-mode", "cenc")
        .field("iv", gst::Buffer::from_slice([3u8; 16]))
        .field("kid", gst::Buffer::from_slice(key_id))
        .field("subsample_count", 2u32)
        .field(
            "subsamples",
            gst::Buffer::from_mut_slice(encode_subsamples(&[
                SubSample::new(16, 8),
                SubSample::new(4, 4),
            ])),
        )
        .field("initWithLast15", true)
        .build();
    gst::ProtectionMeta::add(buffer.make_mut(), info);

    let caps = gst::Caps::builder("video/x-h264")
        .field("width", 1280i32)
        .field("height", 720i32)
        .field("original-media-type", "video/mp4")
        .build();
    decrypt_buffer(&session, buffer.make_mut(), Some(caps.as_ref())).unwrap();

    assert_eq!(contents(&buffer), expected(&plain, &[16..24, 28..32]));
}

#[test]
fn buffers_without_protection_meta_are_rejected() {
    let session = licensed_session(&[0xd5u8; 16]);
    let mut buffer = gst::Buffer::from_mut_slice(vec![0u8; 8]);
    assert!(matches!(
        decrypt_buffer(&session, buffer.make_mut(), None),
        Err(Error::InvalidDecryptBuffer)
    ));
}

#[test]
fn c_entry_point_decrypts_through_a_session_handle() {
    system();
    let key_id = [0xd6u8; 16];
    let system = unsafe { ocdm_capi::opencdm_create_system(c"org.w3.clearkey".as_ptr()) };
    assert!(!system.is_null());
    let mut handle = std::ptr::null_mut();
    let status = unsafe {
        ocdm_capi::opencdm_construct_session(
            system,
            0,
            c"cenc".as_ptr(),
            std::ptr::null(),
            0,
            std::ptr::null(),
            0,
            std::ptr::null(),
            std::ptr::null_mut(),
            &mut handle,
        )
    };
    assert_eq!(status, codes::ERROR_NONE);
    let license = encode_license(&[(&key_id[..], &KEY[..])]);
    let status = unsafe {
        ocdm_capi::opencdm_session_update(handle, license.as_ptr(), license.len() as u16)
    };
    assert_eq!(status, codes::ERROR_NONE);

    let plain = vec![0u8; 12];
    let mut buffer = gst::Buffer::from_mut_slice(plain.clone());
    let info = gst::Structure::builder("application/x-cenc")
        .field("kid", gst::Buffer::from_slice(key_id))
        .build();
    gst::ProtectionMeta::add(buffer.make_mut(), info);

    let status = unsafe {
        opencdm_gstreamer_session_decrypt_buffer(
            handle,
            buffer.make_mut().as_mut_ptr(),
            std::ptr::null(),
        )
    };
    assert_eq!(status, codes::ERROR_NONE);
    assert_eq!(contents(&buffer), expected(&plain, &[0..12]));

    let status = unsafe {
        opencdm_gstreamer_session_decrypt_buffer(
            std::ptr::null(),
            buffer.make_mut().as_mut_ptr(),
            std::ptr::null(),
        )
    };
    assert_eq!(status, codes::ERROR_INVALID_SESSION);

    unsafe {
        ocdm_capi::opencdm_destruct_session(handle);
        ocdm_capi::opencdm_destruct_system(system);
    }
}
