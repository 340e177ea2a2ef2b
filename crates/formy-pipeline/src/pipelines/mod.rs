//! Pipeline variants.
//!
//! Each edit mode (pose change, head swap, background replace) has its own
//! pipeline implementing the [`Pipeline`](crate::Pipeline) trait.

pub mod background_replace;
pub mod head_swap;
pub mod pose_change;

pub use background_replace::BackgroundReplacePipeline;
pub use head_swap::HeadSwapPipeline;
pub use pose_change::PoseChangePipeline;

/// Utility functions shared across pipelines.
pub mod utils {
    use formy_engine::EngineResponse;
    use formy_models::JobResult;
    use serde_json::Value;

    use crate::error::PipelineResult;

    /// Build the job result from the final engine response.
    ///
    /// The thumbnail falls back to the output image when the engine does
    /// not produce one.
    pub fn assemble_result(pipeline: &str, response: &EngineResponse) -> PipelineResult<JobResult> {
        let output_image = response.require_str("output_image")?.to_string();

        let mut result = JobResult::new(output_image.clone());
        result.thumbnail = Some(
            response
                .optional_str("thumbnail")
                .map(str::to_string)
                .unwrap_or(output_image),
        );
        result.comparison_image = response.optional_str("comparison_image").map(str::to_string);

        if let Some(Value::Object(metadata)) = response.output("metadata") {
            result.metadata = metadata.clone();
        }
        result
            .metadata
            .insert("pipeline".to_string(), Value::String(pipeline.to_string()));

        Ok(result)
    }
}
