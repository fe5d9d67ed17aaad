//! RxHub catalog pipeline
//!
//! Turns bulk catalog uploads from pharmacy ERPs into idempotent, parallel,
//! progress-tracked writes against the product store:
//!
//! 1. [`intake`] deduplicates a submission, persists the raw payload, and
//!    records the batch.
//! 2. [`chunker`] splits the payload into fixed-size slices and fans out
//!    one chunk-ready event per slice.
//! 3. [`worker`]s in a shared consumer group bulk-upsert each chunk and
//!    track batch progress through conditional counter updates.
//! 4. [`reconcile`] closes a finished batch out, soft-deleting records a
//!    full-load snapshot no longer declares.
//! 5. [`orchestrator`] sizes the worker pool between a floor and ceiling
//!    from an observed backlog signal.
//!
//! Stages share no in-memory state; they communicate through the event
//! log ([`events`]) and the relational store ([`db`]) only.

pub mod chunker;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod intake;
pub mod models;
pub mod orchestrator;
pub mod reconcile;
pub mod storage;
pub mod worker;

pub use config::PipelineConfig;
pub use error::{IntakeError, PipelineError};
pub use intake::{IntakeRequest, IntakeService};
