//! Domain types shared by every crate in the journal job engine.
//!
//! - [`types`] -- id and timestamp aliases.
//! - [`error`] -- the domain-level [`CoreError`](error::CoreError).
//! - [`job_type`] -- the two pipeline kinds a job can run.
//! - [`job_events`] -- the live progress event envelope.
//! - [`params`] -- typed, validated job input parameters.
//! - [`estimation`] -- duration and remaining-time estimates.

pub mod error;
pub mod estimation;
pub mod job_events;
pub mod job_type;
pub mod params;
pub mod roles;
pub mod types;
