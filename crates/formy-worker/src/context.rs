//! Shared worker state.

use std::sync::Arc;

use formy_engine::EngineClient;
use formy_pipeline::PipelineRegistry;
use formy_queue::TaskStore;

use crate::config::WorkerConfig;

/// Collaborators every slot needs, built once at startup.
///
/// Tests assemble one from in-memory parts.
#[derive(Clone)]
pub struct WorkerContext {
    pub store: Arc<dyn TaskStore>,
    pub registry: Arc<PipelineRegistry>,
    pub engine: Arc<dyn EngineClient>,
    pub config: WorkerConfig,
}

impl WorkerContext {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: Arc<PipelineRegistry>,
        engine: Arc<dyn EngineClient>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            engine,
            config,
        }
    }
}
