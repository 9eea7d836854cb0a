use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle status of an upload record.
///
/// Transitions are monotonic: `Pending` may move to any of the other three,
/// and nothing moves back. `Uploaded` is terminal except for
/// `dispatched_actions` growth.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "upload_status", rename_all = "lowercase"))]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
    Expired,
}

impl UploadStatus {
    /// Whether a transition from `self` to `next` is permitted by the state
    /// machine. Status never moves out of a terminal state.
    pub fn can_transition_to(&self, next: UploadStatus) -> bool {
        matches!(
            (self, next),
            (
                UploadStatus::Pending,
                UploadStatus::Uploaded | UploadStatus::Failed | UploadStatus::Expired
            )
        )
    }

    /// A live record holds its object key: no new intake may reuse the key.
    pub fn is_live(&self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::Uploaded)
    }
}

impl Display for UploadStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadStatus::Pending => write!(f, "pending"),
            UploadStatus::Uploaded => write!(f, "uploaded"),
            UploadStatus::Failed => write!(f, "failed"),
            UploadStatus::Expired => write!(f, "expired"),
        }
    }
}

impl FromStr for UploadStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(UploadStatus::Pending),
            "uploaded" => Ok(UploadStatus::Uploaded),
            "failed" => Ok(UploadStatus::Failed),
            "expired" => Ok(UploadStatus::Expired),
            _ => Err(anyhow::anyhow!("Invalid upload status: {}", s)),
        }
    }
}

/// Downstream actions triggered exactly once per successful upload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DispatchAction {
    Scan,
    Audit,
    Quota,
}

impl DispatchAction {
    /// All actions the service knows how to dispatch.
    pub const ALL: [DispatchAction; 3] = [
        DispatchAction::Scan,
        DispatchAction::Audit,
        DispatchAction::Quota,
    ];
}

impl Display for DispatchAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            DispatchAction::Scan => write!(f, "scan"),
            DispatchAction::Audit => write!(f, "audit"),
            DispatchAction::Quota => write!(f, "quota"),
        }
    }
}

impl FromStr for DispatchAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan" => Ok(DispatchAction::Scan),
            "audit" => Ok(DispatchAction::Audit),
            "quota" => Ok(DispatchAction::Quota),
            _ => Err(anyhow::anyhow!("Invalid dispatch action: {}", s)),
        }
    }
}

/// One requested upload, keyed by its target object key.
///
/// Created by intake with status `Pending`; mutated only by the reconciler
/// (status transition, dispatched actions) or the expiry sweeper. Never
/// deleted by this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    /// Target location in the external store. Join key for reconciliation;
    /// unique across live records.
    pub object_key: String,
    pub status: UploadStatus,
    /// When the issued upload credential stops being valid. Governs whether a
    /// new credential may be issued, not whether a late completion is
    /// accepted.
    pub credential_expiry: DateTime<Utc>,
    /// Actions already acknowledged downstream. Grows monotonically.
    pub dispatched_actions: Vec<DispatchAction>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadRecord {
    pub fn new(object_key: String, credential_expiry: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            object_key,
            status: UploadStatus::Pending,
            credential_expiry,
            dispatched_actions: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_dispatched(&self, action: DispatchAction) -> bool {
        self.dispatched_actions.contains(&action)
    }
}

// `dispatched_actions` is a TEXT[] column; decode failures surface as
// ColumnDecode rather than panicking on an unknown action name.
#[cfg(feature = "sqlx")]
impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for UploadRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;

        let raw_actions: Vec<String> = row.try_get("dispatched_actions")?;
        let dispatched_actions = raw_actions
            .iter()
            .map(|s| {
                s.parse::<DispatchAction>()
                    .map_err(|e| sqlx::Error::ColumnDecode {
                        index: "dispatched_actions".to_string(),
                        source: e.into(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(UploadRecord {
            id: row.try_get("id")?,
            object_key: row.try_get("object_key")?,
            status: row.try_get("status")?,
            credential_expiry: row.try_get("credential_expiry")?,
            dispatched_actions,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Kind of storage-provider notification, after normalization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Removed,
}

/// Canonical internal shape of a provider notification.
///
/// Ephemeral: consumed once by the reconciler and remembered only inside the
/// dedup window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEvent {
    pub object_key: String,
    pub event_type: EventType,
    pub provider_timestamp: DateTime<Utc>,
    /// Stable per-delivery identifier; identical across redeliveries of the
    /// same queue message so duplicates collapse in the dedup window.
    pub raw_event_id: String,
}

/// Result of reconciling one normalized event.
///
/// `Ignored` and `DuplicateIgnored` are not errors: they are the expected
/// face of at-least-once delivery and of notifications for objects this
/// system does not own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The record transitioned to `Uploaded` and dispatch was attempted.
    Reconciled,
    /// No matching live record, or a redundant event for a terminal record.
    Ignored,
    /// At-least-once delivery did its job: this event was already processed,
    /// or a concurrent worker won the transition.
    DuplicateIgnored,
    /// Something externally inconsistent (e.g. an uploaded object removed
    /// behind our back) was observed and logged, with no state change.
    Anomaly,
}
