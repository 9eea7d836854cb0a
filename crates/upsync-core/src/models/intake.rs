use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Request to open an upload slot and receive a pre-signed credential.
#[derive(Debug, Deserialize, Validate)]
pub struct IntakeRequest {
    /// Target object key, e.g. `uploads/42`. Must not collide with a live
    /// record.
    #[validate(length(
        min = 1,
        max = 1024,
        message = "Object key must be between 1 and 1024 characters"
    ))]
    pub object_key: String,
}

/// Response to a successful intake: everything the caller needs to upload
/// directly to the external store.
#[derive(Debug, Clone, Serialize)]
pub struct IntakeGrant {
    /// Record ID tracking this upload through reconciliation.
    pub record_id: Uuid,
    /// Pre-signed PUT URL for the direct upload.
    pub credential_url: String,
    pub object_key: String,
    /// Credential expiration time.
    pub expires_at: DateTime<Utc>,
}
