//! S3 credential issuer.

use crate::traits::{CredentialIssuer, IssuerError, IssuerResult};
use async_trait::async_trait;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use std::time::Duration;

/// Pre-signed URL issuer backed by S3 (or an S3-compatible provider).
#[derive(Clone)]
pub struct S3Issuer {
    store: AmazonS3,
    bucket: String,
}

impl S3Issuer {
    /// Create a new S3Issuer.
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible
    ///   providers (e.g. "http://localhost:9000" for MinIO)
    pub fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> IssuerResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| IssuerError::ConfigError(e.to_string()))?;

        Ok(S3Issuer { store, bucket })
    }
}

#[async_trait]
impl CredentialIssuer for S3Issuer {
    async fn issue_put_url(
        &self,
        object_key: &str,
        expires_in: Duration,
    ) -> IssuerResult<String> {
        let location = Path::from(object_key);
        let url = self
            .store
            .signed_url(Method::PUT, &location, expires_in)
            .await
            .map_err(|e| {
                tracing::error!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %object_key,
                    "Failed to sign upload URL"
                );
                IssuerError::SigningFailed(e.to_string())
            })?;

        tracing::debug!(
            bucket = %self.bucket,
            key = %object_key,
            expires_in_secs = expires_in.as_secs(),
            "Issued pre-signed PUT URL"
        );

        Ok(url.to_string())
    }
}
