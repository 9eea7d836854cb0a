use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use upsync_core::models::DispatchAction;
use uuid::Uuid;

/// Payload delivered to every downstream action target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchNotice {
    pub record_id: Uuid,
    pub object_key: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Downstream notifier.
///
/// `Ok(())` means the target acknowledged delivery; anything else means the
/// attempt failed and may be retried later. A dispatch failure never rolls
/// back the upload's status transition.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// The actions this dispatcher has a configured target for.
    fn configured_actions(&self) -> Vec<DispatchAction>;

    async fn dispatch(&self, action: DispatchAction, notice: &DispatchNotice)
        -> anyhow::Result<()>;
}
