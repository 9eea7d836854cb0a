//! In-memory record store.
//!
//! Same contract as the PostgreSQL store, including the conditional-update
//! semantics, over a mutex-guarded map. Used by tests and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use upsync_core::models::{DispatchAction, UploadRecord, UploadStatus};
use upsync_core::AppError;
use uuid::Uuid;

use crate::traits::RecordStore;

#[derive(Default)]
pub struct MemoryRecordStore {
    records: Mutex<HashMap<Uuid, UploadRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn create(&self, record: &UploadRecord) -> Result<(), AppError> {
        let mut records = self.records.lock().await;
        let live_collision = records
            .values()
            .any(|r| r.object_key == record.object_key && r.status.is_live());
        if live_collision {
            return Err(AppError::Conflict(format!(
                "object key already has a live upload: {}",
                record.object_key
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, AppError> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn get_by_key(&self, object_key: &str) -> Result<Option<UploadRecord>, AppError> {
        let records = self.records.lock().await;
        let live = records
            .values()
            .find(|r| r.object_key == object_key && r.status.is_live());
        let found = live.or_else(|| {
            records
                .values()
                .filter(|r| r.object_key == object_key)
                .max_by_key(|r| r.created_at)
        });
        Ok(found.cloned())
    }

    async fn mark_uploaded(&self, id: Uuid) -> Result<bool, AppError> {
        let mut records = self.records.lock().await;
        match records.get_mut(&id) {
            Some(record) if record.status == UploadStatus::Pending => {
                record.status = UploadStatus::Uploaded;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: Uuid) -> Result<bool, AppError> {
        let mut records = self.records.lock().await;
        match records.get_mut(&id) {
            Some(record) if record.status == UploadStatus::Pending => {
                record.status = UploadStatus::Failed;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn record_dispatched(&self, id: Uuid, action: DispatchAction) -> Result<(), AppError> {
        let mut records = self.records.lock().await;
        if let Some(record) = records.get_mut(&id) {
            if !record.dispatched_actions.contains(&action) {
                record.dispatched_actions.push(action);
                record.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let mut records = self.records.lock().await;
        let mut swept = 0;
        for record in records.values_mut() {
            if record.status == UploadStatus::Pending && record.credential_expiry < now {
                record.status = UploadStatus::Expired;
                record.updated_at = now;
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn list_missing_dispatch(
        &self,
        actions: &[DispatchAction],
        limit: i64,
    ) -> Result<Vec<UploadRecord>, AppError> {
        let records = self.records.lock().await;
        let mut missing: Vec<UploadRecord> = records
            .values()
            .filter(|r| {
                r.status == UploadStatus::Uploaded
                    && actions.iter().any(|a| !r.dispatched_actions.contains(a))
            })
            .cloned()
            .collect();
        missing.sort_by_key(|r| r.updated_at);
        missing.truncate(limit as usize);
        Ok(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn pending_record(key: &str) -> UploadRecord {
        UploadRecord::new(key.to_string(), Utc::now() + Duration::minutes(15))
    }

    #[tokio::test]
    async fn create_rejects_live_key_collision() {
        let store = MemoryRecordStore::new();
        store.create(&pending_record("uploads/42")).await.unwrap();

        let err = store.create(&pending_record("uploads/42")).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn create_allows_reuse_after_expiry() {
        let store = MemoryRecordStore::new();
        let first = pending_record("uploads/42");
        store.create(&first).await.unwrap();
        store
            .expire_overdue(Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        store.create(&pending_record("uploads/42")).await.unwrap();
    }

    #[tokio::test]
    async fn mark_uploaded_wins_exactly_once() {
        let store = MemoryRecordStore::new();
        let record = pending_record("uploads/42");
        store.create(&record).await.unwrap();

        assert!(store.mark_uploaded(record.id).await.unwrap());
        assert!(!store.mark_uploaded(record.id).await.unwrap());

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.status, UploadStatus::Uploaded);
    }

    #[tokio::test]
    async fn record_dispatched_is_idempotent() {
        let store = MemoryRecordStore::new();
        let record = pending_record("uploads/42");
        store.create(&record).await.unwrap();

        store
            .record_dispatched(record.id, DispatchAction::Scan)
            .await
            .unwrap();
        store
            .record_dispatched(record.id, DispatchAction::Scan)
            .await
            .unwrap();

        let stored = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.dispatched_actions, vec![DispatchAction::Scan]);
    }

    #[tokio::test]
    async fn expire_overdue_only_sweeps_pending_past_expiry() {
        let store = MemoryRecordStore::new();
        let overdue = UploadRecord::new(
            "uploads/old".to_string(),
            Utc::now() - Duration::minutes(5),
        );
        let fresh = pending_record("uploads/new");
        store.create(&overdue).await.unwrap();
        store.create(&fresh).await.unwrap();

        let swept = store.expire_overdue(Utc::now()).await.unwrap();
        assert_eq!(swept, 1);
        assert_eq!(
            store.get(overdue.id).await.unwrap().unwrap().status,
            UploadStatus::Expired
        );
        assert_eq!(
            store.get(fresh.id).await.unwrap().unwrap().status,
            UploadStatus::Pending
        );
    }

    #[tokio::test]
    async fn list_missing_dispatch_finds_partial_dispatches() {
        let store = MemoryRecordStore::new();
        let record = pending_record("uploads/42");
        store.create(&record).await.unwrap();
        store.mark_uploaded(record.id).await.unwrap();
        store
            .record_dispatched(record.id, DispatchAction::Scan)
            .await
            .unwrap();

        let wanted = [DispatchAction::Scan, DispatchAction::Audit];
        let missing = store.list_missing_dispatch(&wanted, 10).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, record.id);

        store
            .record_dispatched(record.id, DispatchAction::Audit)
            .await
            .unwrap();
        let missing = store.list_missing_dispatch(&wanted, 10).await.unwrap();
        assert!(missing.is_empty());
    }
}
