//! Job type to pipeline registry.

use std::collections::HashMap;
use std::sync::Arc;

use formy_models::JobType;
use tracing::debug;

use crate::error::RegistryError;
use crate::pipeline::Pipeline;
use crate::pipelines::{BackgroundReplacePipeline, HeadSwapPipeline, PoseChangePipeline};

/// Maps job types to pipelines.
///
/// Built once at startup and shared read-only between worker slots.
#[derive(Clone, Default)]
pub struct PipelineRegistry {
    pipelines: HashMap<JobType, Arc<dyn Pipeline>>,
}

impl PipelineRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in pipeline.
    pub fn with_default_pipelines() -> Self {
        Self::new()
            .register(Arc::new(PoseChangePipeline::new()))
            .register(Arc::new(HeadSwapPipeline::new()))
            .register(Arc::new(BackgroundReplacePipeline::new()))
    }

    /// Register a pipeline under its job type, replacing any previous one.
    pub fn register(mut self, pipeline: Arc<dyn Pipeline>) -> Self {
        debug!(job_type = %pipeline.job_type(), pipeline = pipeline.name(), "Registering pipeline");
        self.pipelines.insert(pipeline.job_type(), pipeline);
        self
    }

    /// Look up the pipeline for a raw job type string.
    pub fn resolve(&self, job_type: &str) -> Result<Arc<dyn Pipeline>, RegistryError> {
        job_type
            .parse::<JobType>()
            .ok()
            .and_then(|t| self.pipelines.get(&t).cloned())
            .ok_or_else(|| RegistryError::UnknownJobType(job_type.to_string()))
    }

    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.pipelines.keys().copied().collect();
        types.sort_by_key(|t| t.as_str());
        types
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
