//! Upsync credential issuer
//!
//! Wraps the external object store's signing capability behind the
//! `CredentialIssuer` trait: a time-bounded, operation-scoped PUT credential
//! per object key. The S3 implementation backs production; the fixed issuer
//! backs tests.

pub mod fixed;
pub mod s3;
pub mod traits;

pub use fixed::FixedIssuer;
pub use s3::S3Issuer;
pub use traits::{CredentialIssuer, IssuerError, IssuerResult};
