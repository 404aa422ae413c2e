//! Background execution of journal jobs.
//!
//! A [`engine::JobEngine`] creates jobs and spawns one
//! [`runner::PipelineRunner`] task per job. The runner walks the job's
//! weighted [`stage::Pipeline`], calling a [`executor::StageExecutor`] for
//! each stage, and hands the accumulated outputs to a
//! [`finalizer::ResultFinalizer`]. Progress is pushed to live clients
//! through the [`subscribers::SubscriberRegistry`].

pub mod engine;
pub mod executor;
pub mod finalizer;
pub mod runner;
pub mod stage;
pub mod subscribers;
