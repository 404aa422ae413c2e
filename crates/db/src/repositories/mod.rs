//! Store layer.
//!
//! Each store is a trait the engine depends on, with a Postgres
//! implementation holding a `PgPool`. In-memory implementations live in
//! [`crate::memory`].

pub mod artifact_repo;
pub mod credit_repo;
pub mod job_repo;

pub use artifact_repo::{ArtifactStore, PgArtifactStore};
pub use credit_repo::{CreditStore, PgCreditStore};
pub use job_repo::{JobStore, PgJobStore};
