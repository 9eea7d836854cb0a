//! Deterministic credential issuer for tests and local development.

use crate::traits::{CredentialIssuer, IssuerError, IssuerResult};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Issues predictable URLs of the form `{base_url}/{key}?sig=fixed`.
/// Can be toggled to fail for exercising intake error paths.
#[derive(Default)]
pub struct FixedIssuer {
    base_url: String,
    fail: AtomicBool,
}

impl FixedIssuer {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            fail: AtomicBool::new(false),
        }
    }

    /// Make every subsequent issuance fail.
    pub fn fail_issuance(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialIssuer for FixedIssuer {
    async fn issue_put_url(
        &self,
        object_key: &str,
        _expires_in: Duration,
    ) -> IssuerResult<String> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(IssuerError::SigningFailed(
                "issuer configured to fail".to_string(),
            ));
        }
        Ok(format!(
            "{}/{}?sig=fixed",
            self.base_url.trim_end_matches('/'),
            object_key
        ))
    }
}
