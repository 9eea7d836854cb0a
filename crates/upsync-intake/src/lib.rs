//! Upsync upload intake
//!
//! Opens an upload slot: creates the pending record (reserving the object
//! key) and returns a pre-signed credential for the direct upload. The
//! record is then owned by the reconciliation side; intake never touches the
//! external store itself.

pub mod service;

pub use service::IntakeService;
