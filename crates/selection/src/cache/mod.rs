// SPDX-License-Identifier: Apache-2.0
//! Caching of discovery results per invocation chain.

mod entry;
mod keyed;

pub use entry::*;
pub use keyed::*;

#[cfg(test)]
#[path = "../tests/cache_tests.rs"]
mod cache_tests;
