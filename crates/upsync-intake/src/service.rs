use chrono::{Duration, Utc};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use upsync_core::models::{IntakeGrant, IntakeRequest, UploadRecord};
use upsync_core::AppError;
use upsync_db::RecordStore;
use upsync_storage::CredentialIssuer;
use validator::Validate;

/// Upload intake service.
///
/// The record is created first so the object key is reserved before any
/// credential exists for it; a second intake for the same live key fails
/// with [`AppError::Conflict`] before reaching the issuer.
pub struct IntakeService {
    store: Arc<dyn RecordStore>,
    issuer: Arc<dyn CredentialIssuer>,
    credential_ttl: StdDuration,
}

impl IntakeService {
    pub fn new(
        store: Arc<dyn RecordStore>,
        issuer: Arc<dyn CredentialIssuer>,
        credential_ttl: StdDuration,
    ) -> Self {
        Self {
            store,
            issuer,
            credential_ttl,
        }
    }

    /// Create a pending record for the requested key and issue an upload
    /// credential for it.
    ///
    /// If issuance fails after the record was created, the record is marked
    /// `Failed` (records are never deleted) and the error propagates.
    #[tracing::instrument(skip(self, request), fields(object_key = %request.object_key))]
    pub async fn request_upload(&self, request: IntakeRequest) -> Result<IntakeGrant, AppError> {
        request.validate()?;

        let expires_at = Utc::now()
            + Duration::seconds(self.credential_ttl.as_secs().min(i64::MAX as u64) as i64);
        let record = UploadRecord::new(request.object_key.clone(), expires_at);

        self.store.create(&record).await?;

        let credential_url = match self
            .issuer
            .issue_put_url(&record.object_key, self.credential_ttl)
            .await
        {
            Ok(url) => url,
            Err(e) => {
                tracing::error!(
                    record_id = %record.id,
                    object_key = %record.object_key,
                    error = %e,
                    "Credential issuance failed, marking record failed"
                );
                // The key stays reserved until the record leaves Pending.
                self.store.mark_failed(record.id).await?;
                return Err(AppError::Issuer(e.to_string()));
            }
        };

        tracing::info!(
            record_id = %record.id,
            object_key = %record.object_key,
            expires_at = %expires_at,
            "Upload slot opened"
        );

        Ok(IntakeGrant {
            record_id: record.id,
            credential_url,
            object_key: record.object_key,
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use upsync_core::models::UploadStatus;
    use upsync_db::MemoryRecordStore;
    use upsync_storage::FixedIssuer;

    fn service_with(
        issuer: Arc<FixedIssuer>,
    ) -> (IntakeService, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        let service = IntakeService::new(
            store.clone(),
            issuer,
            StdDuration::from_secs(15 * 60),
        );
        (service, store)
    }

    #[tokio::test]
    async fn request_upload_returns_grant_and_pending_record() {
        let issuer = Arc::new(FixedIssuer::new("https://bucket.example"));
        let (service, store) = service_with(issuer);

        let grant = service
            .request_upload(IntakeRequest {
                object_key: "uploads/42".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(grant.object_key, "uploads/42");
        assert!(grant.credential_url.contains("uploads/42"));

        let record = store.get(grant.record_id).await.unwrap().unwrap();
        assert_eq!(record.status, UploadStatus::Pending);
        assert_eq!(record.credential_expiry, grant.expires_at);
    }

    #[tokio::test]
    async fn duplicate_live_key_conflicts() {
        let issuer = Arc::new(FixedIssuer::new("https://bucket.example"));
        let (service, _store) = service_with(issuer);

        service
            .request_upload(IntakeRequest {
                object_key: "uploads/42".to_string(),
            })
            .await
            .unwrap();

        let err = service
            .request_upload(IntakeRequest {
                object_key: "uploads/42".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn issuer_failure_marks_record_failed() {
        let issuer = Arc::new(FixedIssuer::new("https://bucket.example"));
        issuer.fail_issuance(true);
        let (service, store) = service_with(issuer);

        let err = service
            .request_upload(IntakeRequest {
                object_key: "uploads/42".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Issuer(_)));

        // Failed record releases the key for a fresh intake.
        let record = store.get_by_key("uploads/42").await.unwrap().unwrap();
        assert_eq!(record.status, UploadStatus::Failed);
    }

    #[tokio::test]
    async fn empty_key_is_invalid() {
        let issuer = Arc::new(FixedIssuer::new("https://bucket.example"));
        let (service, _store) = service_with(issuer);

        let err = service
            .request_upload(IntakeRequest {
                object_key: String::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
