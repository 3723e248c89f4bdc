// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! GStreamer decrypt adapter for OCDM sessions.
//!
//! Decrypts encrypted `GstBuffer`s in place through an [`ocdm::OpenCdmSession`]:
//!
//! - [`decrypt`]: full-sample or sub-sample AES-CTR, described by separate
//!   IV, key ID and sub-sample buffers
//! - [`decrypt_v2`]: the general form, with any encryption scheme and pattern
//! - [`decrypt_buffer`]: everything read from the `GstProtectionMeta`
//!   attached to the buffer, plus a sizing hint parsed from the caps
//!
//! The same operations are exported to C players as
//! `opencdm_gstreamer_session_decrypt*`, taking the session handles of
//! the `ocdm-capi` crate.
//!
//! ## GStreamer Concepts (for non-GStreamer developers)
//! - **Buffer**: a reference-counted chunk of media memory, mapped for
//!   direct access while it is read or written
//! - **Protection meta**: a structure attached to a buffer by the demuxer,
//!   carrying the IV, key ID, sub-sample map and cipher mode of the sample
//! - **Caps (Capabilities)**: media format description of the stream

use std::sync::LazyLock;

use gstreamer as gst;

mod capi;
mod decrypt;

pub use capi::*;
pub use decrypt::{Protection, decrypt, decrypt_buffer, decrypt_v2};

/// GStreamer debug category of the adapter.
///
/// Set `GST_DEBUG=ocdm:5` to see TRACE-level logs.
pub(crate) static CAT: LazyLock<gst::DebugCategory> = LazyLock::new(|| {
    gst::DebugCategory::new(
        "ocdm",
        gst::DebugColorFlags::empty(),
        Some("OCDM decrypt adapter"),
    )
});
