//! Shared data models for the Formy image worker.
//!
//! This crate provides Serde-serializable types for:
//! - Jobs, job types and leases
//! - The job status machine
//! - The error taxonomy written back to failed jobs

pub mod error;
pub mod job;
pub mod job_status;

// Re-export common types
pub use error::{ErrorKind, JobError};
pub use job::{Job, JobId, JobResult, JobType, Lease, NewJob, UnknownJobType};
pub use job_status::JobStatus;
