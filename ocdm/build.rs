// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Build script for the `ocdm` crate.
//!
//! This script generates `constants.rs` containing the compile-time default
//! for the RPC connector path. Integrators can override it at build time by
//! setting `OCDM_DEFAULT_CONNECTOR`; at run time `OPEN_CDM_SERVER` still wins.

use std::env;
use std::path::PathBuf;

/// Connector used when neither the build nor the environment provides one.
const FALLBACK_CONNECTOR: &str = "/tmp/ocdm";

fn main() {
    println!("cargo:rerun-if-env-changed=OCDM_DEFAULT_CONNECTOR");

    let connector =
        env::var("OCDM_DEFAULT_CONNECTOR").unwrap_or_else(|_| FALLBACK_CONNECTOR.to_string());

    let out_path = PathBuf::from(env::var("OUT_DIR").expect("failed to get output directory"))
        .join("constants.rs");

    let data = format!("pub const OCDM_DEFAULT_CONNECTOR: &str = {connector:?};\n");
    std::fs::write(out_path, data).expect("Unable to write file");
}
