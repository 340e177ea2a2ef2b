//! Durable task store for image jobs.
//!
//! This crate provides:
//! - The [`TaskStore`] contract (claim, lease-guarded writes, reclaim)
//! - A Redis implementation using sorted sets and Lua scripts
//! - An in-memory implementation with the same semantics

pub mod config;
pub mod error;
pub mod memory;
pub mod redis_store;
pub mod store;

pub use config::{QueueConfig, StoreBackend};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryTaskStore;
pub use redis_store::RedisTaskStore;
pub use store::{JobUpdate, TaskStore, UpdateOutcome};
