//! Upsync reconciliation worker
//!
//! Consumes storage-provider event notifications from the queue, normalizes
//! them, and reconciles upload records. A background sweeper expires stale
//! pending records and repairs missed dispatches.

pub mod consumer;
pub mod normalizer;
pub mod reconciler;
pub mod sweeper;

pub use consumer::{ConsumerConfig, EventConsumer};
pub use normalizer::normalize;
pub use reconciler::Reconciler;
pub use sweeper::Sweeper;
