//! Upsync dispatcher
//!
//! At-least-once notification of downstream subscribers (scan, audit, quota)
//! after a reconciled upload. Delivery is acknowledged or it is not; the
//! caller records an action as dispatched only after an ack, and retries
//! un-acked actions independently of the upload's status transition.
//! Downstream consumers must be idempotent keyed on `(record_id, action)`.

pub mod recording;
pub mod traits;
pub mod webhook;

pub use recording::RecordingDispatcher;
pub use traits::{DispatchNotice, Dispatcher};
pub use webhook::{WebhookDispatcher, WebhookDispatcherConfig};
