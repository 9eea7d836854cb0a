//! In-memory dispatcher that records deliveries, for tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use upsync_core::models::DispatchAction;
use uuid::Uuid;

use crate::traits::{DispatchNotice, Dispatcher};

/// Records every acknowledged `(record_id, action)` pair. Can be toggled to
/// fail, to exercise the dispatch-failure paths.
pub struct RecordingDispatcher {
    actions: Vec<DispatchAction>,
    delivered: Mutex<Vec<(Uuid, DispatchAction)>>,
    fail: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new(actions: Vec<DispatchAction>) -> Self {
        Self {
            actions,
            delivered: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn fail_dispatch(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn delivered(&self) -> Vec<(Uuid, DispatchAction)> {
        self.delivered.lock().await.clone()
    }

    pub async fn delivery_count(&self, record_id: Uuid, action: DispatchAction) -> usize {
        self.delivered
            .lock()
            .await
            .iter()
            .filter(|(id, a)| *id == record_id && *a == action)
            .count()
    }
}

#[async_trait]
impl Dispatcher for RecordingDispatcher {
    fn configured_actions(&self) -> Vec<DispatchAction> {
        self.actions.clone()
    }

    async fn dispatch(
        &self,
        action: DispatchAction,
        notice: &DispatchNotice,
    ) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("dispatcher configured to fail"));
        }
        self.delivered
            .lock()
            .await
            .push((notice.record_id, action));
        Ok(())
    }
}
