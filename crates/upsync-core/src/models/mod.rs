//! Data models for the reconciliation service.

pub mod intake;
pub mod upload;

// Re-export all models for convenient imports
pub use intake::*;
pub use upload::*;
