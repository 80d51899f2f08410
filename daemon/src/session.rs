//! Backend session abstraction
//!
//! The probe executor only sees these traits; the HTTP implementation lives
//! in [`crate::vault`].

use crate::{config::Profile, error::SessionError};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Authenticated session against the secret backend
#[async_trait]
pub trait Session: Send + Sync {
    /// Write `data` to `path`
    async fn write(&self, path: &str, data: &Map<String, Value>) -> Result<(), SessionError>;

    /// Read the secret stored at `path`
    async fn read(&self, path: &str) -> Result<Value, SessionError>;

    /// Revoke the token this session authenticated with
    async fn revoke_self(&self) -> Result<(), SessionError>;
}

/// Produces authenticated sessions from profile credentials
///
/// Timeouts and retry counts are construction-time settings of the factory;
/// callers never retry.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, profile: &Profile) -> Result<Box<dyn Session>, SessionError>;
}
