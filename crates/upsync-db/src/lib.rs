//! Upsync Record Store
//!
//! Durable keyed storage for upload records. The `RecordStore` trait is the
//! seam: the PostgreSQL implementation backs production, the in-memory
//! implementation backs tests and local development. Correctness under
//! concurrent reconciliation rests entirely on the store's conditional
//! write (`mark_uploaded`); no other mutual exclusion exists.

pub mod memory;
pub mod postgres;
pub mod traits;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;
pub use traits::RecordStore;

/// Embedded migrations for the upload_records schema.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
