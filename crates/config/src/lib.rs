// SPDX-License-Identifier: Apache-2.0
//! Crate for configuring endorser selection.
//!
//! Construction-time settings for the selection service and the retry policy used for
//! discovery round-trips.

mod retry;
pub use retry::*;
mod selection;
pub use selection::*;
