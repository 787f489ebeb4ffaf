//! Error types for campaign-dispatch
//!
//! This module provides the error handling for the library:
//! - [`Error`], the crate-wide error returned from fallible operations
//! - [`DispatchError`] for rejected control operations (start/stop/pause/resume)
//! - [`DatabaseError`] for the SQLite-backed campaign store
//! - [`TransportError`], the explicit error kind of a single delivery attempt

use crate::types::CampaignId;
use thiserror::Error;

/// Result type alias for campaign-dispatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for campaign-dispatch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "delivery.api_key")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Control operation rejected by the dispatcher
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Delivery attempt failed
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Campaign not found in the store
    #[error("campaign {0} not found")]
    CampaignNotFound(CampaignId),

    /// Shutdown in progress - not accepting new runs
    #[error("shutdown in progress: not accepting new runs")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Rejected control operations
///
/// These are reported synchronously to the caller; they never affect a run
/// that is already executing.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// A run for this campaign is already active (pending, running or paused)
    #[error("campaign {id} already has an active run ({state})")]
    AlreadyRunning {
        /// The campaign that is already running
        id: CampaignId,
        /// The current run state
        state: String,
    },

    /// No active run exists for this campaign
    #[error("no active run for campaign {id}")]
    NoActiveRun {
        /// The campaign without an active run
        id: CampaignId,
    },

    /// Demo mode is enabled but no substitute addresses are configured
    #[error("campaign {id} is in demo mode but has no demo addresses")]
    MissingDemoAddresses {
        /// The misconfigured campaign
        id: CampaignId,
    },
}

/// Failure of a single delivery attempt
///
/// The transport returns this kind instead of a stringly-typed error so the
/// retry loop and the dispatcher never have to inspect messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// The delivery API answered with a status outside the accepted set
    #[error("status code {status}: {body}")]
    Http {
        /// HTTP status code returned by the API
        status: u16,
        /// Response body (possibly truncated)
        body: String,
    },

    /// Connection-level failure (DNS, refused, reset)
    #[error("network failure: {0}")]
    Network(String),

    /// The request did not complete within the configured timeout
    #[error("request timed out")]
    Timeout,

    /// The request could not be built (bad address, missing credentials)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The send never produced a result (the delivery task panicked or was cancelled)
    #[error("delivery task aborted: {0}")]
    Aborted(String),
}

impl TransportError {
    /// HTTP status code, when the API produced one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else if e.is_builder() {
            TransportError::InvalidRequest(e.to_string())
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_errors_render_campaign_id() {
        let err = Error::from(DispatchError::NoActiveRun { id: CampaignId(7) });
        assert_eq!(err.to_string(), "dispatch error: no active run for campaign 7");

        let err = Error::from(DispatchError::AlreadyRunning {
            id: CampaignId(3),
            state: "paused".to_string(),
        });
        assert!(err.to_string().contains("campaign 3 already has an active run (paused)"));
    }

    #[test]
    fn http_transport_error_exposes_status() {
        let err = TransportError::Http {
            status: 429,
            body: "rate limited".to_string(),
        };
        assert_eq!(err.status_code(), Some(429));
        assert_eq!(err.to_string(), "status code 429: rate limited");
        assert_eq!(TransportError::Timeout.status_code(), None);
    }

    #[test]
    fn config_error_keeps_key() {
        let err = Error::Config {
            message: "max_workers must be at least 1".to_string(),
            key: Some("dispatch.max_workers".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "configuration error: max_workers must be at least 1"
        );
    }
}
