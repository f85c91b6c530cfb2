//! Error types for the sync engine and the remote gateway.

use crate::model::Timestamp;
use std::fmt;
use thiserror::Error;

/// A remote resource fetched during a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Events,
    Tasks,
    Calendars,
    Profile,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Resource::Events => "events",
            Resource::Tasks => "tasks",
            Resource::Calendars => "calendars",
            Resource::Profile => "profile",
        };
        f.write_str(name)
    }
}

/// One resource that failed during a multi-resource refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFailure {
    pub resource: Resource,
    pub message: String,
}

impl fmt::Display for ResourceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.resource, self.message)
    }
}

/// Client-side validation, rejected before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("title is required")]
    MissingTitle,

    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("invalid time range: end ({end}) must be after start ({start})")]
    InvalidTimeRange { start: Timestamp, end: Timestamp },

    #[error("update carries no changes")]
    EmptyPatch,
}

/// Failures reported by a [`Gateway`](crate::gateway::Gateway).
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request to {endpoint} failed: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{endpoint} returned {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("{endpoint}: target not found")]
    NotFound { endpoint: String },

    #[error("failed to decode response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid backend url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound { .. })
    }
}

/// Errors surfaced by [`SyncSession`](crate::session::SyncSession) operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network failure: {0}")]
    Network(GatewayError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The mutation target vanished. Mutations treat this as success.
    #[error("{0} no longer exists")]
    NotFound(String),

    #[error("refresh #{epoch} partially failed: {}", join_failures(.failures))]
    PartialRefresh {
        epoch: u64,
        failures: Vec<ResourceFailure>,
    },

    #[error("{} of {total} deletions failed", .failed.len())]
    BulkDelete { failed: Vec<String>, total: usize },

    #[error("session has been torn down")]
    TornDown,
}

impl SyncError {
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }
}

impl From<GatewayError> for SyncError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotFound { endpoint } => SyncError::NotFound(endpoint),
            other => SyncError::Network(other),
        }
    }
}

fn join_failures(failures: &[ResourceFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
