// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Licenses a session on the loopback DRM engine and decrypts a stream of
//! samples through its shared memory channel, optionally from several
//! sessions in parallel.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use ocdm::config::DecryptSerialization;
use ocdm::loopback::{LoopbackDrm, LoopbackTransport, encode_license};
use ocdm::{KeyStatus, OcdmConfig, Registry, SampleInfo, SubSample};
use tracing::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Key system to open.
    #[arg(long, default_value = "org.w3.clearkey")]
    key_system: String,

    /// Bytes per sample.
    #[arg(long, default_value_t = 64 * 1024)]
    sample_size: usize,

    /// Samples decrypted per session.
    #[arg(long, default_value_t = 100)]
    samples: usize,

    /// Number of sessions decrypting concurrently.
    #[arg(long, default_value_t = 1)]
    sessions: usize,

    /// Serialize decrypts per session instead of process-wide.
    #[arg(long)]
    per_session: bool,
}

fn main() -> Result<(), ocdm::Error> {
    common::setup_logging();
    let args = Args::parse();
    if args.sample_size < 16 {
        return Err(ocdm::Error::InvalidArg);
    }

    let config = OcdmConfig {
        decrypt_serialization: if args.per_session {
            DecryptSerialization::PerSession
        } else {
            DecryptSerialization::Global
        },
        ..OcdmConfig::from_env()
    };
    let drm = LoopbackDrm::new([args.key_system.clone()]);
    let registry = Registry::connect(Arc::new(LoopbackTransport::new(drm)), config)?;
    let system = registry.create_system(&args.key_system)?;
    info!("System {} metadata: {}", system.id(), system.metadata());

    let start = Instant::now();
    let workers = (0..args.sessions)
        .map(|index| -> Result<_, ocdm::Error> {
            let key_id = [index as u8; 16];
            let session = system.create_session(0, "cenc", &key_id, &[], None)?;
            session.update(&encode_license(&[(&key_id, b"loopback-key")]))?;

            let found =
                registry.wait_for_key(&key_id, Duration::from_secs(1), KeyStatus::Usable, None);
            info!("Key {index} usable in session {found:?}");

            let sample_size = args.sample_size;
            let samples = args.samples;
            Ok(std::thread::spawn(move || -> Result<(), ocdm::Error> {
                let info = SampleInfo::cenc(&[0; 16], &key_id).with_subsamples(vec![
                    SubSample::new(16, (sample_size / 2) as u32),
                    SubSample::new(0, (sample_size - 16 - sample_size / 2) as u32),
                ]);
                let mut sample = vec![0u8; sample_size];
                for _ in 0..samples {
                    session.decrypt(&mut sample, Some(&info), false, None)?;
                }
                Ok(())
            }))
        })
        .collect::<Result<Vec<_>, ocdm::Error>>()?;

    for worker in workers {
        worker
            .join()
            .map_err(|_| ocdm::Error::Other("Decrypt thread panicked".to_string()))??;
    }

    let elapsed = start.elapsed();
    let total = args.sessions * args.samples;
    info!(
        "Decrypted {total} samples of {} bytes in {elapsed:?} ({:.1} samples/s)",
        args.sample_size,
        total as f64 / elapsed.as_secs_f64()
    );
    Ok(())
}
