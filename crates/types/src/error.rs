// SPDX-License-Identifier: Apache-2.0
//! Error types for endorser selection.

use std::{fmt, time::Duration};
use thiserror::Error;

/// Return an error if the condition is false.
#[macro_export(local_inner_macros)]
macro_rules! ensure {
    ($cond:expr, $e:expr) => {
        if !($cond) {
            return Err($e);
        }
    };
}

/// Result for discovery round-trips.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Result for endorser selection.
pub type SelectionResult<T> = Result<T, SelectionError>;

/// Server messages indicating the endorsement query can't be satisfied right now.
///
/// These happen while chaincodes are being installed or peers are joining, so the query is
/// worth repeating.
const QUERY_ENDORSERS_PATTERNS: &[&str] = &[
    "failed constructing descriptor",
    "no endorsement combination can be satisfied",
    "required chaincodes are not installed",
    "cannot satisfy",
];

/// Server messages indicating the client is not allowed to query discovery.
const ACCESS_DENIED_PATTERNS: &[&str] = &["access denied"];

/// Server messages indicating the channel is unknown to the server.
const CHANNEL_MISCONFIGURED_PATTERNS: &[&str] =
    &["channel not found", "not a member of channel", "no such channel"];

/// Classification of a server-reported discovery failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// The server could not compute endorsers for the invocation chain. Retry.
    QueryEndorsers,
    /// The client identity was rejected by the server.
    AccessDenied,
    /// The server doesn't know the channel or this client isn't part of it.
    ChannelMisconfigured,
    /// Any other server error.
    Unknown,
}

impl StatusCode {
    /// Returns true if repeating the query may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueryEndorsers | Self::Unknown)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::QueryEndorsers => "QUERY_ENDORSERS",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::ChannelMisconfigured => "CHANNEL_MISCONFIGURED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Typed status for an error reported by a discovery server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryStatus {
    pub code: StatusCode,
    /// The target that reported the error, if known.
    pub target: Option<String>,
    pub message: String,
}

impl DiscoveryStatus {
    /// Classify a server message reported by `target`.
    pub fn classify(target: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        let lowercase = message.to_lowercase();
        let matches_any = |patterns: &[&str]| patterns.iter().any(|p| lowercase.contains(p));

        let code = if matches_any(ACCESS_DENIED_PATTERNS) {
            StatusCode::AccessDenied
        } else if matches_any(CHANNEL_MISCONFIGURED_PATTERNS) {
            StatusCode::ChannelMisconfigured
        } else if matches_any(QUERY_ENDORSERS_PATTERNS) {
            StatusCode::QueryEndorsers
        } else {
            StatusCode::Unknown
        };

        Self { code, target: target.map(ToString::to_string), message }
    }
}

impl fmt::Display for DiscoveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(f, "[{}] {} from target {}", self.code, self.message, target),
            None => write!(f, "[{}] {}", self.code, self.message),
        }
    }
}

/// Errors from a discovery round-trip.
#[derive(Clone, Debug, Error)]
pub enum DiscoveryError {
    /// The request could not be delivered or the connection failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// No response arrived before the deadline.
    #[error("discovery request timed out after {0:?}")]
    Timeout(Duration),
    /// No discovery target is configured for the channel.
    #[error("no discovery targets configured for channel [{0}]")]
    NoTargets(String),
    /// The transport returned no responses at all.
    #[error("no successful response received from any peer")]
    NoResponses,
    /// The server answered with an error.
    #[error("discovery status: {0}")]
    Status(DiscoveryStatus),
    /// The owning service has been closed.
    #[error("discovery cache is closed")]
    Closed,
}

impl DiscoveryError {
    /// Build a [DiscoveryError::Status] from a raw server message.
    pub fn from_server(target: Option<&str>, message: impl Into<String>) -> Self {
        Self::Status(DiscoveryStatus::classify(target, message))
    }

    /// Returns true if repeating the round-trip may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) | Self::NoResponses => true,
            Self::Status(status) => status.code.is_transient(),
            Self::NoTargets(_) | Self::Closed => false,
        }
    }

    pub fn is_access_denied(&self) -> bool {
        matches!(self, Self::Status(DiscoveryStatus { code: StatusCode::AccessDenied, .. }))
    }

    /// The status code, if the server reported this error.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Status(status) => Some(status.code),
            _ => None,
        }
    }
}

/// Errors returned to callers selecting endorsers.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// The request did not name any chaincode.
    #[error("no chaincode IDs provided")]
    NoChaincodes,
    /// The channel response could not be obtained from discovery.
    #[error("error getting channel response for channel [{channel_id}]: {source}")]
    ChannelResponse {
        channel_id: String,
        #[source]
        source: DiscoveryError,
    },
    /// The cached channel response failed to produce endorsers.
    #[error("error getting endorsers from channel response: {0}")]
    Endorsers(#[source] DiscoveryError),
    /// The local membership view failed.
    #[error("error getting peers from local discovery service: {0}")]
    Membership(#[from] eyre::Report),
    /// The selection service has been closed.
    #[error("selection service for channel [{0}] is closed")]
    Closed(String),
}

impl SelectionError {
    /// The underlying discovery error, if any.
    pub fn discovery_error(&self) -> Option<&DiscoveryError> {
        match self {
            Self::ChannelResponse { source, .. } | Self::Endorsers(source) => Some(source),
            _ => None,
        }
    }
}
