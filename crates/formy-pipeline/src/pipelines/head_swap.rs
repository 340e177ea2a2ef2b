//! Head swap: place the head from a reference image onto the source body.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use formy_models::{JobResult, JobType};

use crate::context::PipelineContext;
use crate::error::PipelineResult;
use crate::params::{optional_unit_f64, required_str, Params};
use crate::pipeline::Pipeline;

use super::utils::assemble_result;

const DETECT_FACE: &str = "detect_face";
const SWAP_HEAD: &str = "swap_head";

struct Inputs {
    source_image: String,
    head_image: String,
    blend_strength: Option<f64>,
}

impl Inputs {
    fn parse(params: &Params) -> PipelineResult<Self> {
        Ok(Self {
            source_image: required_str(params, &["source_image"])?,
            head_image: required_str(params, &["head_image", "reference_image"])?,
            blend_strength: optional_unit_f64(params, "blend_strength")?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct HeadSwapPipeline;

impl HeadSwapPipeline {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Pipeline for HeadSwapPipeline {
    fn name(&self) -> &'static str {
        "head_swap"
    }

    fn job_type(&self) -> JobType {
        JobType::HeadSwap
    }

    fn validate(&self, params: &Params) -> PipelineResult<()> {
        Inputs::parse(params).map(|_| ())
    }

    async fn process(&self, params: &Params, ctx: &PipelineContext) -> PipelineResult<JobResult> {
        let inputs = Inputs::parse(params)?;

        ctx.report(10, "detecting face").await;
        let detected = ctx
            .call(DETECT_FACE, json!({ "image": inputs.head_image }))
            .await?;
        let face = detected.require("face")?.clone();

        ctx.report(50, "swapping head").await;
        let mut payload = json!({
            "source_image": inputs.source_image,
            "face": face,
        });
        if let Some(blend) = inputs.blend_strength {
            payload["blend_strength"] = Value::from(blend);
        }
        let swapped = ctx.call(SWAP_HEAD, payload).await?;

        let result = assemble_result(self.name(), &swapped)?;
        ctx.report(100, "completed").await;

        info!(job_id = %ctx.job_id(), output = %result.output_image, "Head swap completed");
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipelines::test_support::{context, params, ScriptedEngine};
    use formy_engine::EngineError;
    use formy_models::ErrorKind;

    #[tokio::test]
    async fn test_face_is_passed_to_swap() {
        let engine = ScriptedEngine::new();
        engine.reply(json!({ "face": { "bbox": [10, 20, 64, 64] } }));
        engine.reply(json!({
            "output_image": "/results/swap.png",
            "thumbnail": "/results/swap_thumb.png",
            "comparison_image": "/results/swap_cmp.png",
            "metadata": { "model": "hs-2" }
        }));

        let p = params(json!({
            "source_image": "/uploads/body.png",
            "reference_image": "/uploads/head.png",
            "blend_strength": 0.25
        }));
        let result = HeadSwapPipeline::new()
            .process(&p, &context(engine.clone()))
            .await
            .unwrap();

        assert_eq!(engine.operations(), vec![DETECT_FACE, SWAP_HEAD]);
        assert_eq!(engine.payload(0)["image"], "/uploads/head.png");
        assert_eq!(engine.payload(1)["face"]["bbox"][2], 64);
        assert_eq!(engine.payload(1)["blend_strength"], 0.25);

        assert_eq!(result.thumbnail.as_deref(), Some("/results/swap_thumb.png"));
        assert_eq!(result.comparison_image.as_deref(), Some("/results/swap_cmp.png"));
        assert_eq!(result.metadata["model"], "hs-2");
        assert_eq!(result.metadata["pipeline"], "head_swap");
    }

    #[tokio::test]
    async fn test_missing_face_output_is_rejected() {
        let engine = ScriptedEngine::new();
        engine.reply(json!({ "faces": [] }));

        let p = params(json!({ "source_image": "/a.png", "head_image": "/b.png" }));
        let err = HeadSwapPipeline::new()
            .process(&p, &context(engine.clone()))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Rejected);
        assert_eq!(engine.operations(), vec![DETECT_FACE]);
    }

    #[tokio::test]
    async fn test_second_call_transient_failure_is_retryable() {
        let engine = ScriptedEngine::new();
        engine.reply(json!({ "face": {} }));
        engine.fail(EngineError::unavailable("gpu pool drained"));

        let p = params(json!({ "source_image": "/a.png", "head_image": "/b.png" }));
        let err = HeadSwapPipeline::new()
            .process(&p, &context(engine))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::TransientUnavailable);
        assert!(err.is_retryable());
    }
}
