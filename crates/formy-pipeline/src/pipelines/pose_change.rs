//! Pose change: re-pose the subject of the source image to match a
//! reference pose.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use formy_models::{JobResult, JobType};

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::params::{optional_u64, optional_unit_f64, required_str, Params};
use crate::pipeline::Pipeline;

use super::utils::assemble_result;

const EXTRACT_POSE: &str = "extract_pose";
const TRANSFER_POSE: &str = "transfer_pose";

struct Inputs {
    source_image: String,
    pose_image: String,
    strength: Option<f64>,
    seed: Option<u64>,
}

impl Inputs {
    fn parse(params: &Params) -> PipelineResult<Self> {
        Ok(Self {
            source_image: required_str(params, &["source_image"])?,
            pose_image: required_str(params, &["pose_image", "pose_reference"])?,
            strength: optional_unit_f64(params, "strength")?,
            seed: optional_u64(params, "seed")?,
        })
    }
}

/// Two engine calls: pose extraction on the reference, then transfer onto
/// the source.
#[derive(Debug, Default, Clone, Copy)]
pub struct PoseChangePipeline;

impl PoseChangePipeline {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Pipeline for PoseChangePipeline {
    fn name(&self) -> &'static str {
        "pose_change"
    }

    fn job_type(&self) -> JobType {
        JobType::PoseChange
    }

    fn validate(&self, params: &Params) -> PipelineResult<()> {
        Inputs::parse(params).map(|_| ())
    }

    async fn process(&self, params: &Params, ctx: &PipelineContext) -> PipelineResult<JobResult> {
        let inputs = Inputs::parse(params)?;

        ctx.report(10, "extracting pose").await;
        let extracted = ctx
            .call(EXTRACT_POSE, json!({ "image": inputs.pose_image }))
            .await?;
        let pose = extracted.require("pose")?.clone();

        ctx.report(50, "transferring pose").await;
        let mut payload = json!({
            "source_image": inputs.source_image,
            "pose": pose,
        });
        if let Some(strength) = inputs.strength {
            payload["strength"] = Value::from(strength);
        }
        if let Some(seed) = inputs.seed {
            payload["seed"] = Value::from(seed);
        }
        let transferred = ctx.call(TRANSFER_POSE, payload).await?;

        let result = assemble_result(self.name(), &transferred)?;
        ctx.report(100, "completed").await;

        info!(job_id = %ctx.job_id(), output = %result.output_image, "Pose change completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::test_support::{context, params, ScriptedEngine};
    use formy_engine::EngineError;
    use formy_models::ErrorKind;
    use std::time::Duration;

    #[tokio::test]
    async fn test_calls_run_in_order_and_chain_outputs() {
        let engine = ScriptedEngine::new();
        engine.reply(json!({ "pose": { "keypoints": [[1, 2], [3, 4]] } }));
        engine.reply(json!({ "output_image": "/results/out.png" }));

        let p = params(json!({
            "source_image": "/uploads/src.png",
            "pose_reference": "/uploads/pose.png",
            "strength": 0.7,
            "seed": 9
        }));
        let result = PoseChangePipeline::new()
            .process(&p, &context(engine.clone()))
            .await
            .unwrap();

        assert_eq!(engine.operations(), vec![EXTRACT_POSE, TRANSFER_POSE]);
        assert_eq!(engine.payload(0)["image"], "/uploads/pose.png");
        let transfer = engine.payload(1);
        assert_eq!(transfer["pose"]["keypoints"][1][0], 3);
        assert_eq!(transfer["strength"], 0.7);
        assert_eq!(transfer["seed"], 9);

        assert_eq!(result.output_image, "/results/out.png");
        assert_eq!(result.thumbnail.as_deref(), Some("/results/out.png"));
        assert_eq!(result.metadata["pipeline"], "pose_change");
    }

    #[tokio::test]
    async fn test_missing_pose_image_fails_without_engine_calls() {
        let engine = ScriptedEngine::new();
        let p = params(json!({ "source_image": "/uploads/src.png" }));

        let err = PoseChangePipeline::new()
            .process(&p, &context(engine.clone()))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidParameters);
        assert!(engine.operations().is_empty());
    }

    #[test]
    fn test_strength_out_of_range_is_rejected() {
        let p = params(json!({
            "source_image": "/a.png",
            "pose_image": "/b.png",
            "strength": 2.0
        }));
        let err = PoseChangePipeline::new().validate(&p).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParameters);
    }

    #[tokio::test]
    async fn test_first_call_failure_stops_pipeline() {
        let engine = ScriptedEngine::new();
        engine.fail(EngineError::timeout(EXTRACT_POSE, Duration::from_secs(1)));

        let p = params(json!({ "source_image": "/a.png", "pose_image": "/b.png" }));
        let err = PoseChangePipeline::new()
            .process(&p, &context(engine.clone()))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(engine.operations(), vec![EXTRACT_POSE]);
    }
}
