//! Event reconciler.
//!
//! Applies one normalized event to the record store. Correctness rests on
//! the store's conditional transition, not on this code being the only
//! writer: any number of workers can race on the same record and exactly one
//! of them wins `Pending -> Uploaded`. The in-process dedup window is a
//! fast path that keeps redeliveries from hitting the store at all; losing
//! it (restart, eviction) only costs a harmless no-op update.

use chrono::Utc;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;
use upsync_core::models::{
    DispatchAction, EventType, NormalizedEvent, Outcome, UploadRecord, UploadStatus,
};
use upsync_core::AppError;
use upsync_db::RecordStore;
use upsync_dispatch::{DispatchNotice, Dispatcher};

pub struct Reconciler {
    store: Arc<dyn RecordStore>,
    dispatcher: Arc<dyn Dispatcher>,
    seen: Mutex<LruCache<String, ()>>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        dispatcher: Arc<dyn Dispatcher>,
        dedup_window_size: NonZeroUsize,
    ) -> Self {
        Self {
            store,
            dispatcher,
            seen: Mutex::new(LruCache::new(dedup_window_size)),
        }
    }

    /// Reconcile one event against the store.
    ///
    /// Errors are always store-side and recoverable; every business-level
    /// "nothing to do" case is an [`Outcome`], so the caller can acknowledge
    /// the message instead of redelivering it.
    #[tracing::instrument(skip(self, event), fields(object_key = %event.object_key, raw_event_id = %event.raw_event_id))]
    pub async fn reconcile(&self, event: &NormalizedEvent) -> Result<Outcome, AppError> {
        if self.seen.lock().await.get(&event.raw_event_id).is_some() {
            tracing::debug!("Event already processed within dedup window");
            return Ok(Outcome::DuplicateIgnored);
        }

        let Some(record) = self.store.get_by_key(&event.object_key).await? else {
            tracing::info!("No record for object key, ignoring event");
            return Ok(Outcome::Ignored);
        };

        match (record.status, event.event_type) {
            (UploadStatus::Pending, EventType::Created) => {
                if !self.store.mark_uploaded(record.id).await? {
                    // A concurrent duplicate (or the sweeper) got there first.
                    tracing::debug!(record_id = %record.id, "Lost the transition race");
                    return Ok(Outcome::DuplicateIgnored);
                }
                self.remember(&event.raw_event_id).await;
                tracing::info!(record_id = %record.id, "Upload reconciled");
                self.dispatch_missing(&record).await;
                Ok(Outcome::Reconciled)
            }
            (UploadStatus::Pending, EventType::Removed) => {
                tracing::warn!(
                    record_id = %record.id,
                    "Object removed before its upload was observed"
                );
                Ok(Outcome::Ignored)
            }
            (UploadStatus::Uploaded, EventType::Created) => {
                // Provider re-notification for a record already reconciled.
                // The record is terminal, so this is a redundant event, not a
                // duplicate delivery; only a dedup-window hit counts as one.
                self.remember(&event.raw_event_id).await;
                tracing::debug!(record_id = %record.id, "Record already uploaded");
                Ok(Outcome::Ignored)
            }
            (UploadStatus::Uploaded, EventType::Removed) => {
                // The object vanished underneath a completed upload. Status
                // stays Uploaded; removal is outside this state machine.
                tracing::warn!(
                    record_id = %record.id,
                    "Uploaded object removed from external store"
                );
                Ok(Outcome::Anomaly)
            }
            (UploadStatus::Expired, EventType::Created) => {
                // The upload finished after the sweeper gave up on it. The
                // record stays Expired; the object is now unowned.
                tracing::warn!(
                    record_id = %record.id,
                    credential_expiry = %record.credential_expiry,
                    "Completion event for an already-expired record"
                );
                Ok(Outcome::Ignored)
            }
            (UploadStatus::Expired | UploadStatus::Failed, _) => {
                tracing::debug!(record_id = %record.id, status = %record.status, "Event for terminal record");
                Ok(Outcome::Ignored)
            }
        }
    }

    /// Attempt every configured action the record has not yet dispatched.
    ///
    /// Failures are logged and left behind: the status transition already
    /// committed, and the repair pass retries missing actions later. Targets
    /// must tolerate occasional duplicates.
    pub async fn dispatch_missing(&self, record: &UploadRecord) {
        let notice = DispatchNotice {
            record_id: record.id,
            object_key: record.object_key.clone(),
            uploaded_at: Utc::now(),
        };

        for action in self.dispatcher.configured_actions() {
            if record.has_dispatched(action) {
                continue;
            }
            match self.dispatcher.dispatch(action, &notice).await {
                Ok(()) => {
                    if let Err(e) = self.store.record_dispatched(record.id, action).await {
                        tracing::error!(
                            record_id = %record.id,
                            action = %action,
                            error = %e,
                            "Delivered but failed to record dispatch; target may see a duplicate"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        record_id = %record.id,
                        action = %action,
                        error = %e,
                        "Dispatch attempt failed, leaving for repair pass"
                    );
                }
            }
        }
    }

    /// Actions the underlying dispatcher has targets for.
    pub fn configured_actions(&self) -> Vec<DispatchAction> {
        self.dispatcher.configured_actions()
    }

    async fn remember(&self, raw_event_id: &str) {
        self.seen.lock().await.put(raw_event_id.to_string(), ());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use upsync_db::MemoryRecordStore;
    use upsync_dispatch::RecordingDispatcher;

    fn event(key: &str, event_type: EventType, raw_event_id: &str) -> NormalizedEvent {
        NormalizedEvent {
            object_key: key.to_string(),
            event_type,
            provider_timestamp: Utc::now(),
            raw_event_id: raw_event_id.to_string(),
        }
    }

    async fn setup() -> (Reconciler, Arc<MemoryRecordStore>, Arc<RecordingDispatcher>) {
        let store = Arc::new(MemoryRecordStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new(DispatchAction::ALL.to_vec()));
        let reconciler = Reconciler::new(
            store.clone(),
            dispatcher.clone(),
            NonZeroUsize::new(64).unwrap(),
        );
        (reconciler, store, dispatcher)
    }

    async fn pending_record(store: &MemoryRecordStore, key: &str) -> UploadRecord {
        let record = UploadRecord::new(key.to_string(), Utc::now() + Duration::minutes(15));
        store.create(&record).await.unwrap();
        record
    }

    #[tokio::test]
    async fn created_event_reconciles_pending_record() {
        let (reconciler, store, dispatcher) = setup().await;
        let record = pending_record(&store, "uploads/42").await;

        let outcome = reconciler
            .reconcile(&event("uploads/42", EventType::Created, "m1:0"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Reconciled);

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Uploaded);
        for action in DispatchAction::ALL {
            assert!(stored.has_dispatched(action));
            assert_eq!(dispatcher.delivery_count(record.id, action).await, 1);
        }
    }

    #[tokio::test]
    async fn unknown_key_is_ignored() {
        let (reconciler, _store, dispatcher) = setup().await;

        let outcome = reconciler
            .reconcile(&event("uploads/99", EventType::Created, "m1:0"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ignored);
        assert!(dispatcher.delivered().await.is_empty());
    }

    #[tokio::test]
    async fn redelivered_event_is_deduplicated() {
        let (reconciler, store, dispatcher) = setup().await;
        let record = pending_record(&store, "uploads/42").await;

        let first = reconciler
            .reconcile(&event("uploads/42", EventType::Created, "m1:0"))
            .await
            .unwrap();
        assert_eq!(first, Outcome::Reconciled);

        // Same raw_event_id: caught by the dedup window without a store hit.
        let second = reconciler
            .reconcile(&event("uploads/42", EventType::Created, "m1:0"))
            .await
            .unwrap();
        assert_eq!(second, Outcome::DuplicateIgnored);

        for action in DispatchAction::ALL {
            assert_eq!(dispatcher.delivery_count(record.id, action).await, 1);
        }
    }

    #[tokio::test]
    async fn duplicate_past_the_window_still_transitions_once() {
        let (reconciler, store, dispatcher) = setup().await;
        let record = pending_record(&store, "uploads/42").await;

        reconciler
            .reconcile(&event("uploads/42", EventType::Created, "m1:0"))
            .await
            .unwrap();

        // Fresh raw_event_id, so the window misses; the terminal record
        // makes it a redundant event rather than a detected duplicate.
        let outcome = reconciler
            .reconcile(&event("uploads/42", EventType::Created, "m2:0"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ignored);

        // The same distinct notification again: now it is in the window.
        let outcome = reconciler
            .reconcile(&event("uploads/42", EventType::Created, "m2:0"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::DuplicateIgnored);

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Uploaded);
        for action in DispatchAction::ALL {
            assert_eq!(dispatcher.delivery_count(record.id, action).await, 1);
        }
    }

    #[tokio::test]
    async fn concurrent_duplicates_produce_one_winner() {
        let (reconciler, store, _dispatcher) = setup().await;
        pending_record(&store, "uploads/42").await;
        let reconciler = Arc::new(reconciler);

        let mut handles = Vec::new();
        for i in 0..8 {
            let reconciler = reconciler.clone();
            handles.push(tokio::spawn(async move {
                reconciler
                    .reconcile(&event("uploads/42", EventType::Created, &format!("m{}:0", i)))
                    .await
                    .unwrap()
            }));
        }

        let mut outcomes = Vec::new();
        for handle in handles {
            outcomes.push(handle.await.unwrap());
        }
        let winners = outcomes
            .iter()
            .filter(|o| **o == Outcome::Reconciled)
            .count();
        assert_eq!(winners, 1);
        // Losers either lost the conditional update (DuplicateIgnored) or
        // read the record after the winner committed (Ignored); never errors.
        assert!(outcomes
            .iter()
            .all(|o| matches!(
                o,
                Outcome::Reconciled | Outcome::DuplicateIgnored | Outcome::Ignored
            )));
    }

    #[tokio::test]
    async fn removal_of_uploaded_object_is_an_anomaly() {
        let (reconciler, store, _dispatcher) = setup().await;
        let record = pending_record(&store, "uploads/42").await;
        store.mark_uploaded(record.id).await.unwrap();

        let outcome = reconciler
            .reconcile(&event("uploads/42", EventType::Removed, "m1:0"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Anomaly);

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Uploaded);
    }

    #[tokio::test]
    async fn removal_of_pending_record_is_ignored() {
        let (reconciler, store, _dispatcher) = setup().await;
        let record = pending_record(&store, "uploads/42").await;

        let outcome = reconciler
            .reconcile(&event("uploads/42", EventType::Removed, "m1:0"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ignored);

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Pending);
    }

    #[tokio::test]
    async fn expired_credential_still_pending_accepts_late_completion() {
        let (reconciler, store, _dispatcher) = setup().await;
        // Credential long past expiry but not yet swept.
        let record = UploadRecord::new(
            "uploads/42".to_string(),
            Utc::now() - Duration::minutes(30),
        );
        store.create(&record).await.unwrap();

        let outcome = reconciler
            .reconcile(&event("uploads/42", EventType::Created, "m1:0"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Reconciled);

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Uploaded);
    }

    #[tokio::test]
    async fn late_completion_for_expired_record_is_ignored() {
        let (reconciler, store, dispatcher) = setup().await;
        let record = UploadRecord::new(
            "uploads/42".to_string(),
            Utc::now() - Duration::minutes(5),
        );
        store.create(&record).await.unwrap();
        assert_eq!(store.expire_overdue(Utc::now()).await.unwrap(), 1);

        let outcome = reconciler
            .reconcile(&event("uploads/42", EventType::Created, "m1:0"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Ignored);

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Expired);
        assert!(dispatcher.delivered().await.is_empty());
    }

    #[tokio::test]
    async fn dispatch_failure_keeps_transition_and_leaves_actions_missing() {
        let (reconciler, store, dispatcher) = setup().await;
        let record = pending_record(&store, "uploads/42").await;
        dispatcher.fail_dispatch(true);

        let outcome = reconciler
            .reconcile(&event("uploads/42", EventType::Created, "m1:0"))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Reconciled);

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Uploaded);
        assert!(stored.dispatched_actions.is_empty());

        // Repair pass after the targets recover.
        dispatcher.fail_dispatch(false);
        reconciler.dispatch_missing(&stored).await;
        let repaired = store.get(record.id).await.unwrap().unwrap();
        for action in DispatchAction::ALL {
            assert!(repaired.has_dispatched(action));
        }
    }
}
