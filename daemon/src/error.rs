//! Error taxonomy for probes and publishing
//!
//! None of these errors is fatal: the scheduler logs them, counts them and
//! moves on to the next profile or the next tick.

use reliability_common::BucketKind;
use thiserror::Error;

/// Errors raised by a backend session
#[derive(Debug, Error)]
pub enum SessionError {
    /// Transport failure (connect, timeout, TLS, body decoding)
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body was not the expected JSON
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Login succeeded but returned no client token
    #[error("login response carried no client token")]
    MissingToken,

    /// Profile carries neither a token nor login data
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
}

/// Failure of one probe step, tagged with its category
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("auth failed for profile {profile}: {source}")]
    Auth {
        profile: String,
        #[source]
        source: SessionError,
    },

    #[error("write to {path} failed for profile {profile}: {source}")]
    Write {
        profile: String,
        path: String,
        #[source]
        source: SessionError,
    },

    #[error("read of {path} failed for profile {profile}: {source}")]
    Read {
        profile: String,
        path: String,
        #[source]
        source: SessionError,
    },

    #[error("token revocation failed for profile {profile}: {source}")]
    Revoke {
        profile: String,
        #[source]
        source: SessionError,
    },
}

impl ProbeError {
    /// Bucket whose error counter this failure increments
    pub fn bucket(&self) -> BucketKind {
        match self {
            ProbeError::Auth { .. } => BucketKind::Auth,
            ProbeError::Write { .. } => BucketKind::Write,
            ProbeError::Read { .. } => BucketKind::Read,
            ProbeError::Revoke { .. } => BucketKind::Revoke,
        }
    }
}

/// Errors raised while publishing a snapshot
#[derive(Debug, Error)]
pub enum PublishError {
    /// Transport failure while pushing
    #[error("push failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Sink answered with a non-success status
    #[error("push rejected with status {status}: {body}")]
    Status { status: u16, body: String },

    /// Metric family could not be built or updated
    #[error("metrics registry error: {0}")]
    Registry(#[from] prometheus::Error),

    /// Text exposition could not be encoded
    #[error("encoding error: {0}")]
    Encode(String),
}
