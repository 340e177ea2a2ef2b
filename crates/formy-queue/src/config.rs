//! Store configuration.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::memory::MemoryTaskStore;
use crate::redis_store::RedisTaskStore;
use crate::store::TaskStore;

/// Which task store implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" | "in_memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {other}")),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: StoreBackend,
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key the store writes
    pub key_prefix: String,
    /// How long a finished job record is kept; zero keeps it forever
    pub job_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "formy".to_string(),
            job_retention: Duration::from_secs(86400),
        }
    }
}

fn parse_backend(value: Option<String>) -> StoreResult<StoreBackend> {
    match value {
        Some(value) => value.parse().map_err(StoreError::config),
        None => Ok(StoreBackend::Redis),
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        let backend = parse_backend(std::env::var("STORE_BACKEND").ok())?;
        let job_retention = match std::env::var("JOB_RETENTION_SECS") {
            Ok(value) => value.parse().map(Duration::from_secs).map_err(|_| {
                StoreError::config(format!("JOB_RETENTION_SECS is not a number: {value}"))
            })?,
            Err(_) => Duration::from_secs(86400),
        };

        Ok(Self {
            backend,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("QUEUE_KEY_PREFIX").unwrap_or_else(|_| "formy".to_string()),
            job_retention,
        })
    }

    /// Build the configured store.
    pub fn connect(&self) -> StoreResult<Arc<dyn TaskStore>> {
        match self.backend {
            StoreBackend::Redis => Ok(Arc::new(RedisTaskStore::new(self.clone())?)),
            StoreBackend::Memory => Ok(Arc::new(MemoryTaskStore::new())),
        }
    }
}
