//! HTTP webhook dispatcher.
//!
//! Posts the dispatch notice as JSON to a per-action target URL. A 2xx
//! response is the acknowledgement; anything else is a failed attempt. When
//! a signing secret is configured the body carries an HMAC-SHA256 signature
//! header so targets can authenticate the sender.

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::Client;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;
use upsync_core::models::DispatchAction;

use crate::traits::{DispatchNotice, Dispatcher};

type HmacSha256 = Hmac<Sha256>;

/// Configuration for the webhook dispatcher.
#[derive(Clone, Default)]
pub struct WebhookDispatcherConfig {
    /// Target URL per action. Actions without a target are not configured
    /// and never dispatched.
    pub targets: HashMap<DispatchAction, String>,
    pub timeout_seconds: u64,
    pub signing_secret: Option<String>,
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    http_client: Client,
    config: WebhookDispatcherConfig,
}

impl WebhookDispatcher {
    pub fn new(config: WebhookDispatcherConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create HTTP client for dispatch")?;

        Ok(Self {
            http_client,
            config,
        })
    }

    /// Sign a payload body with HMAC-SHA256.
    fn sign_payload(body: &str, secret: &str) -> Result<String> {
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).context("Invalid signing secret")?;
        mac.update(body.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Verify a signature produced by `sign_payload` (for targets and tests).
    pub fn verify_signature(body: &str, secret: &str, signature: &str) -> Result<bool> {
        Ok(Self::sign_payload(body, secret)? == signature)
    }
}

#[async_trait::async_trait]
impl Dispatcher for WebhookDispatcher {
    fn configured_actions(&self) -> Vec<DispatchAction> {
        DispatchAction::ALL
            .into_iter()
            .filter(|a| self.config.targets.contains_key(a))
            .collect()
    }

    #[tracing::instrument(skip(self, notice), fields(record_id = %notice.record_id, action = %action))]
    async fn dispatch(&self, action: DispatchAction, notice: &DispatchNotice) -> Result<()> {
        let url = self
            .config
            .targets
            .get(&action)
            .with_context(|| format!("No target configured for action: {}", action))?;

        let body = serde_json::to_string(notice).context("Failed to serialize notice")?;

        let mut request = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .header("User-Agent", "Upsync-Dispatch/1.0")
            .header("X-Upsync-Action", action.to_string());

        if let Some(ref secret) = self.config.signing_secret {
            let signature = Self::sign_payload(&body, secret)?;
            request = request.header("X-Upsync-Signature", format!("v1={}", signature));
        }

        let response = request
            .body(body)
            .send()
            .await
            .context("Failed to send dispatch request")?;

        let status = response.status();
        if status.is_success() {
            tracing::info!(
                record_id = %notice.record_id,
                action = %action,
                status_code = status.as_u16(),
                "Dispatch acknowledged"
            );
            Ok(())
        } else {
            let response_body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("Failed to read response body"));
            Err(anyhow::anyhow!(
                "Dispatch target returned non-2xx status: {} - {}",
                status.as_u16(),
                response_body
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips() {
        let body = r#"{"record_id":"00000000-0000-0000-0000-000000000000"}"#;
        let signature = WebhookDispatcher::sign_payload(body, "secret").unwrap();
        assert!(WebhookDispatcher::verify_signature(body, "secret", &signature).unwrap());
        assert!(!WebhookDispatcher::verify_signature(body, "other", &signature).unwrap());
    }

    #[test]
    fn configured_actions_follow_targets() {
        let mut targets = HashMap::new();
        targets.insert(
            DispatchAction::Scan,
            "https://scan.internal/hook".to_string(),
        );
        targets.insert(
            DispatchAction::Quota,
            "https://quota.internal/hook".to_string(),
        );
        let dispatcher = WebhookDispatcher::new(WebhookDispatcherConfig {
            targets,
            timeout_seconds: 5,
            signing_secret: None,
        })
        .unwrap();

        let actions = dispatcher.configured_actions();
        assert!(actions.contains(&DispatchAction::Scan));
        assert!(actions.contains(&DispatchAction::Quota));
        assert!(!actions.contains(&DispatchAction::Audit));
    }
}
