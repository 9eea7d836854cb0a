//! Record store abstraction trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use upsync_core::models::{DispatchAction, UploadRecord};
use upsync_core::AppError;
use uuid::Uuid;

/// Durable keyed storage for upload records.
///
/// `mark_uploaded` is the optimistic-concurrency primitive the whole
/// reconciler relies on: the `Pending -> Uploaded` transition succeeds for
/// exactly one caller per record, no matter how many duplicate notifications
/// race on it.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a new record. Fails with [`AppError::Conflict`] when a live
    /// (pending or uploaded) record already holds the same object key.
    async fn create(&self, record: &UploadRecord) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, AppError>;

    /// Lookup by object key, the reconciliation join key. Only live records
    /// match; a key whose record expired or failed behaves like an unknown
    /// key at reconcile time, except that `Expired` is still visible for
    /// anomaly logging.
    async fn get_by_key(&self, object_key: &str) -> Result<Option<UploadRecord>, AppError>;

    /// Conditional transition `Pending -> Uploaded`. Returns `Ok(true)` when
    /// this caller won the transition, `Ok(false)` when the record was no
    /// longer `Pending` (a concurrent duplicate won, or the sweeper got
    /// there first).
    async fn mark_uploaded(&self, id: Uuid) -> Result<bool, AppError>;

    /// Conditional transition `Pending -> Failed` (e.g. credential issuance
    /// failed after the record was created). Returns `Ok(true)` on success.
    async fn mark_failed(&self, id: Uuid) -> Result<bool, AppError>;

    /// Append an action to `dispatched_actions`, once. Idempotent: recording
    /// an already-present action is a no-op.
    async fn record_dispatched(&self, id: Uuid, action: DispatchAction) -> Result<(), AppError>;

    /// Transition every `Pending` record whose credential expiry has passed
    /// to `Expired`. Returns the number of records swept.
    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, AppError>;

    /// `Uploaded` records still missing at least one of the given actions,
    /// for the dispatch-repair pass.
    async fn list_missing_dispatch(
        &self,
        actions: &[DispatchAction],
        limit: i64,
    ) -> Result<Vec<UploadRecord>, AppError>;
}
