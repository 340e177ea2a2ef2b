//! The pipeline contract shared by every edit mode.

use async_trait::async_trait;
use formy_models::{JobResult, JobType};

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::params::Params;

/// Processing strategy for one job type.
///
/// Implementations validate their parameters before touching the engine,
/// then issue their engine calls sequentially through the context.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Get the name of this pipeline for logging and debugging.
    fn name(&self) -> &'static str;

    /// Job type this pipeline handles.
    fn job_type(&self) -> JobType;

    /// Check required parameters without calling the engine.
    fn validate(&self, params: &Params) -> PipelineResult<()>;

    /// Run the pipeline and assemble the final result.
    async fn process(&self, params: &Params, ctx: &PipelineContext) -> PipelineResult<JobResult>;
}
