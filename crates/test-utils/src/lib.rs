// SPDX-License-Identifier: Apache-2.0
//! Test doubles and fixtures for endorser selection.

#![warn(unused_crate_dependencies)]

mod fixtures;
pub use fixtures::*;
mod discovery;
pub use discovery::*;
mod local;
pub use local::*;

/// Install a fmt subscriber filtered by `RUST_LOG` for the current test binary.
///
/// Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
