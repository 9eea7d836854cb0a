//! PostgreSQL record store.
//!
//! Dynamic SQLx queries (no compile-time DATABASE_URL requirement). Live-key
//! uniqueness is a partial unique index; the `Pending -> Uploaded` transition
//! is a conditional UPDATE whose `rows_affected` decides the winner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use upsync_core::models::{DispatchAction, UploadRecord, UploadStatus};
use upsync_core::AppError;
use uuid::Uuid;

use crate::traits::RecordStore;

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn actions_to_text(actions: &[DispatchAction]) -> Vec<String> {
    actions.iter().map(|a| a.to_string()).collect()
}

const RECORD_COLUMNS: &str =
    "id, object_key, status, credential_expiry, dispatched_actions, created_at, updated_at";

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create(&self, record: &UploadRecord) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO upload_records (
                id, object_key, status, credential_expiry, dispatched_actions,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(record.id)
        .bind(&record.object_key)
        .bind(record.status)
        .bind(record.credential_expiry)
        .bind(actions_to_text(&record.dispatched_actions))
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(AppError::Conflict(format!(
                    "object key already has a live upload: {}",
                    record.object_key
                )))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<UploadRecord>, AppError> {
        let row = sqlx::query_as::<_, UploadRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM upload_records WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn get_by_key(&self, object_key: &str) -> Result<Option<UploadRecord>, AppError> {
        // Prefer the live record; fall back to the newest dead one so the
        // reconciler can tell "expired" apart from "never existed".
        let row = sqlx::query_as::<_, UploadRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM upload_records
            WHERE object_key = $1
            ORDER BY (status IN ('pending', 'uploaded')) DESC, created_at DESC
            LIMIT 1
            "#
        ))
        .bind(object_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn mark_uploaded(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_records
            SET status = 'uploaded', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_records
            SET status = 'failed', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_dispatched(&self, id: Uuid, action: DispatchAction) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE upload_records
            SET dispatched_actions = array_append(dispatched_actions, $2),
                updated_at = NOW()
            WHERE id = $1 AND NOT (dispatched_actions @> ARRAY[$2])
            "#,
        )
        .bind(id)
        .bind(action.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn expire_overdue(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_records
            SET status = 'expired', updated_at = NOW()
            WHERE status = 'pending' AND credential_expiry < $1
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_missing_dispatch(
        &self,
        actions: &[DispatchAction],
        limit: i64,
    ) -> Result<Vec<UploadRecord>, AppError> {
        if actions.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, UploadRecord>(&format!(
            r#"
            SELECT {RECORD_COLUMNS} FROM upload_records
            WHERE status = $1 AND NOT (dispatched_actions @> $2)
            ORDER BY updated_at
            LIMIT $3
            "#
        ))
        .bind(UploadStatus::Uploaded)
        .bind(actions_to_text(actions))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // query_as requires the record to decode straight from a Postgres row;
    // the impl lives with the model in upsync-core.
    #[test]
    fn upload_record_decodes_from_pg_rows() {
        fn assert_decodes<T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow>>() {}
        assert_decodes::<UploadRecord>();
    }
}
