//! Background sweeper.
//!
//! Two periodic passes over the record store:
//! - expiry: `Pending` records whose credential expired move to `Expired`,
//!   releasing their object keys for new intakes;
//! - dispatch repair: `Uploaded` records still missing configured actions
//!   get their dispatch re-attempted, so a target outage heals without
//!   touching the queue.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use upsync_db::RecordStore;

use crate::reconciler::Reconciler;

/// Records examined per repair pass. Remaining records wait for the next
/// tick.
const REPAIR_BATCH_SIZE: i64 = 100;

pub struct Sweeper {
    shutdown_tx: mpsc::Sender<()>,
}

impl Sweeper {
    /// Spawn the sweep loop on the current runtime.
    pub fn new(
        store: Arc<dyn RecordStore>,
        reconciler: Arc<Reconciler>,
        interval: Duration,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "Sweeper started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep_once(store.as_ref(), &reconciler).await;
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Sweeper shutting down");
                        break;
                    }
                }
            }
        });

        Self { shutdown_tx }
    }

    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

/// One sweep: expiry first, then dispatch repair. A failing pass is logged
/// and retried on the next tick; the two passes are independent.
pub async fn sweep_once(store: &dyn RecordStore, reconciler: &Reconciler) {
    match store.expire_overdue(Utc::now()).await {
        Ok(0) => {}
        Ok(swept) => tracing::info!(swept = swept, "Expired overdue pending records"),
        Err(e) => tracing::error!(error = %e, "Expiry sweep failed"),
    }

    let actions = reconciler.configured_actions();
    if actions.is_empty() {
        return;
    }
    match store.list_missing_dispatch(&actions, REPAIR_BATCH_SIZE).await {
        Ok(records) => {
            for record in &records {
                reconciler.dispatch_missing(record).await;
            }
        }
        Err(e) => tracing::error!(error = %e, "Dispatch repair scan failed"),
    }
}
