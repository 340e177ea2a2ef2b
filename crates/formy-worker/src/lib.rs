//! Background image job worker.
//!
//! This crate provides:
//! - Job executor with concurrent slots and stale-lease recovery
//! - Retry policy with exponential backoff
//! - Progress reporting into the task store
//! - Structured logging and Prometheus metrics
//! - Graceful shutdown

pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod policy;
pub mod progress;
pub mod retry;

pub use config::WorkerConfig;
pub use context::WorkerContext;
pub use error::{WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::{init_tracing, JobLogger};
pub use policy::{Decision, RetryPolicy};
