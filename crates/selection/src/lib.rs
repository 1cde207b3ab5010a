// SPDX-License-Identifier: Apache-2.0
//! Discovery-based endorser selection.
//!
//! [SelectionService] asks the channel's discovery service which peers can endorse an
//! invocation chain, caches the answer per chain and keeps it fresh in the background.
//! Each selection filters the cached answer against the locally known channel members and
//! orders the result with a [PeerSorter].

#![warn(unused_crate_dependencies)]

mod balancer;
pub use balancer::*;
mod cache;
pub use cache::*;
mod discovery;
pub use discovery::{ErrorHandler, FanOutClient};
mod filter;
pub use filter::{BlockHeightPriority, PeerComparator, PeerFilter};
mod metrics;
pub use metrics::*;
mod service;
pub use service::*;
mod sorter;
pub use sorter::*;
