// SPDX-License-Identifier: Apache-2.0
//! Shared types for discovery-based endorser selection.

#![warn(unused_crate_dependencies)]

mod chaincode;
mod discovery;
mod peer;
#[macro_use]
pub mod error;
pub use chaincode::*;
pub use discovery::*;
pub use error::*;
pub use peer::*;
