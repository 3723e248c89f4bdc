// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! # OCDM - client side of the Open Content Decryption Module
//!
//! Safe Rust client for an out-of-process DRM service: license sessions,
//! key status tracking and a shared-memory decrypt channel through which
//! media samples are decrypted by the DRM engine.
//!
//! ## Overview
//!
//! The DRM engine lives in another process (possibly in a TEE). This crate
//! keeps the client side of that conversation:
//!
//! - **Registry**: the process-wide connection to the DRM service and the
//!   table of live sessions ([`Registry`])
//! - **System**: one key system of the engine, e.g. `org.w3.clearkey` ([`OpenCdmSystem`])
//! - **Session**: one license session with its keys ([`OpenCdmSession`])
//! - **Decrypt channel**: named shared memory plus a produce/consume
//!   handshake that moves one sample at a time to the engine and back
//!   ([`exchange`])
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐  Transport   ┌──────────────────┐
//! │ Registry │─────────────►│ DRM service (RPC) │
//! └────┬─────┘              └────────┬─────────┘
//!      │                             │ notifications
//!      ├─► OpenCdmSystem ──► OpenCdmSession ◄┘
//!      │                          │
//!      └── wait_for_key(kid)      └─► DataExchange ══ shared memory ══ decryptor
//! ```
//!
//! ## Examples
//!
//! ### Acquiring a key and decrypting a sample
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ocdm::loopback::{LoopbackDrm, LoopbackTransport, encode_license};
//! use ocdm::{OcdmConfig, Registry, SampleInfo};
//!
//! # fn main() -> Result<(), ocdm::Error> {
//! let drm = LoopbackDrm::new(["org.w3.clearkey"]);
//! let registry = Registry::connect(Arc::new(LoopbackTransport::new(drm)), OcdmConfig::default())?;
//!
//! let system = registry.create_system("org.w3.clearkey")?;
//! let session = system.create_session(0, "cenc", b"init-data", &[], None)?;
//!
//! let key_id = [0x42u8; 16];
//! session.update(&encode_license(&[(&key_id, &[0x5au8])]))?;
//!
//! let mut sample = vec![0u8; 1024];
//! session.decrypt(&mut sample, Some(&SampleInfo::cenc(&[0; 16], &key_id)), false, None)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Thread safety
//!
//! [`Registry`], [`OpenCdmSystem`] and [`OpenCdmSession`] are cheap to clone
//! and `Send + Sync`. Decrypts are serialized process-wide unless the
//! configuration asks for per-session serialization
//! ([`config::DecryptSerialization`]).

mod caps;
pub mod config;
mod error;
pub mod exchange;
#[cfg(feature = "loopback")]
pub mod loopback;
mod registry;
pub mod remote;
mod sample;
mod session;
pub mod subsample;
pub mod svp;
mod system;

pub use caps::CapsParser;
pub use config::OcdmConfig;
pub use error::{Error, Result, Status, codes, status_of};
pub use registry::Registry;
pub use sample::*;
pub use session::{OpenCdmSession, SessionCallbacks, SessionError};
pub use subsample::{GatheredSample, SubsampleReader};
pub use system::OpenCdmSystem;
