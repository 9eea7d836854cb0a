//! Provider notification normalizer.
//!
//! Turns one raw queue message body (an S3-style event notification) into
//! zero or more [`NormalizedEvent`]s. Test events and event kinds this
//! service does not care about are dropped here, before the reconciler ever
//! sees them; only genuinely unparseable payloads surface as
//! [`AppError::MalformedEvent`].

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use serde::Deserialize;
use upsync_core::models::{EventType, NormalizedEvent};
use upsync_core::AppError;

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "Records")]
    records: Vec<EventRecord>,
}

#[derive(Debug, Deserialize)]
struct EventRecord {
    #[serde(rename = "eventName")]
    event_name: String,
    #[serde(rename = "eventTime")]
    event_time: DateTime<Utc>,
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    object: S3Object,
}

#[derive(Debug, Deserialize)]
struct S3Object {
    key: String,
}

/// Normalize one queue message body.
///
/// `message_id` is the queue's stable delivery identifier; each record in the
/// body gets `"{message_id}:{index}"` as its `raw_event_id`, so a redelivered
/// message produces the same ids and collapses in the dedup window.
///
/// Keys outside `key_prefix` belong to other tenants of the bucket and are
/// dropped without reconciliation.
pub fn normalize(
    message_id: &str,
    body: &str,
    key_prefix: &str,
) -> Result<Vec<NormalizedEvent>, AppError> {
    let value: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| AppError::MalformedEvent(format!("invalid JSON: {}", e)))?;

    // The provider sends a one-off test event when notifications are first
    // configured on a bucket. Not an error, just noise.
    if value.get("Event").and_then(|v| v.as_str()) == Some("s3:TestEvent") {
        tracing::debug!(message_id = %message_id, "Discarding bucket test event");
        return Ok(Vec::new());
    }

    let notification: Notification = serde_json::from_value(value)
        .map_err(|e| AppError::MalformedEvent(format!("unrecognized event shape: {}", e)))?;

    let mut events = Vec::with_capacity(notification.records.len());
    for (index, record) in notification.records.into_iter().enumerate() {
        let event_type = match classify(&record.event_name) {
            Some(t) => t,
            None => {
                tracing::debug!(
                    message_id = %message_id,
                    event_name = %record.event_name,
                    "Discarding event of uninteresting kind"
                );
                continue;
            }
        };

        let object_key = decode_key(&record.s3.object.key)?;
        if !object_key.starts_with(key_prefix) {
            tracing::debug!(
                message_id = %message_id,
                object_key = %object_key,
                "Discarding event outside managed key prefix"
            );
            continue;
        }

        events.push(NormalizedEvent {
            object_key,
            event_type,
            provider_timestamp: record.event_time,
            raw_event_id: format!("{}:{}", message_id, index),
        });
    }

    Ok(events)
}

fn classify(event_name: &str) -> Option<EventType> {
    if event_name.starts_with("ObjectCreated:") {
        Some(EventType::Created)
    } else if event_name.starts_with("ObjectRemoved:") {
        Some(EventType::Removed)
    } else {
        None
    }
}

/// Object keys arrive URL-encoded with spaces as `+`.
fn decode_key(raw: &str) -> Result<String, AppError> {
    let plus_decoded = raw.replace('+', " ");
    percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| AppError::MalformedEvent(format!("object key is not valid UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn created_body(key: &str) -> String {
        format!(
            r#"{{"Records":[{{"eventVersion":"2.1","eventSource":"aws:s3","eventName":"ObjectCreated:Put","eventTime":"2026-08-26T10:00:00.000Z","s3":{{"bucket":{{"name":"bucket"}},"object":{{"key":"{}","size":1024}}}}}}]}}"#,
            key
        )
    }

    #[test]
    fn created_event_normalizes() {
        let events = normalize("msg-1", &created_body("uploads/42"), "uploads/").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].object_key, "uploads/42");
        assert_eq!(events[0].event_type, EventType::Created);
        assert_eq!(events[0].raw_event_id, "msg-1:0");
    }

    #[test]
    fn removed_event_normalizes() {
        let body = created_body("uploads/42").replace("ObjectCreated:Put", "ObjectRemoved:Delete");
        let events = normalize("msg-1", &body, "uploads/").unwrap();
        assert_eq!(events[0].event_type, EventType::Removed);
    }

    #[test]
    fn key_is_url_decoded() {
        let events = normalize(
            "msg-1",
            &created_body("uploads/report+2026%2808%29.pdf"),
            "uploads/",
        )
        .unwrap();
        assert_eq!(events[0].object_key, "uploads/report 2026(08).pdf");
    }

    #[test]
    fn keys_outside_prefix_are_dropped() {
        let events = normalize("msg-1", &created_body("thumbnails/42"), "uploads/").unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn uninteresting_event_kinds_are_dropped() {
        let body =
            created_body("uploads/42").replace("ObjectCreated:Put", "ObjectRestore:Completed");
        let events = normalize("msg-1", &body, "uploads/").unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_event_is_dropped_silently() {
        let body = r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Time":"2026-08-26T10:00:00.000Z","Bucket":"bucket"}"#;
        let events = normalize("msg-1", body, "uploads/").unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = normalize("msg-1", "not json at all", "uploads/").unwrap_err();
        assert!(matches!(err, AppError::MalformedEvent(_)));
    }

    #[test]
    fn missing_records_is_malformed() {
        let err = normalize("msg-1", r#"{"something":"else"}"#, "uploads/").unwrap_err();
        assert!(matches!(err, AppError::MalformedEvent(_)));
    }

    #[test]
    fn redelivery_produces_identical_event_ids() {
        let body = created_body("uploads/42");
        let first = normalize("msg-1", &body, "uploads/").unwrap();
        let second = normalize("msg-1", &body, "uploads/").unwrap();
        assert_eq!(first[0].raw_event_id, second[0].raw_event_id);
    }

    #[test]
    fn multi_record_bodies_index_event_ids() {
        let body = format!(
            r#"{{"Records":[{},{}]}}"#,
            record_json("uploads/1"),
            record_json("uploads/2")
        );
        let events = normalize("msg-9", &body, "uploads/").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].raw_event_id, "msg-9:0");
        assert_eq!(events[1].raw_event_id, "msg-9:1");
    }

    fn record_json(key: &str) -> String {
        format!(
            r#"{{"eventName":"ObjectCreated:Put","eventTime":"2026-08-26T10:00:00.000Z","s3":{{"bucket":{{"name":"bucket"}},"object":{{"key":"{}"}}}}}}"#,
            key
        )
    }
}
