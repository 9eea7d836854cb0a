//! Credential issuer abstraction trait.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Credential issuance errors
#[derive(Debug, Error)]
pub enum IssuerError {
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for issuer operations
pub type IssuerResult<T> = Result<T, IssuerError>;

/// Issues a time-bounded, operation-scoped upload credential.
///
/// The credential is opaque to this service: it is handed to the caller, who
/// uploads directly to the external store with it. This service never
/// contacts the store on the upload path.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    /// Generate a pre-signed PUT URL for the given object key, valid for
    /// `expires_in`.
    async fn issue_put_url(&self, object_key: &str, expires_in: Duration)
        -> IssuerResult<String>;
}
