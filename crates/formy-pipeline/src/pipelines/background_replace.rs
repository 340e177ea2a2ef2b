//! Background replace: segment the person and composite them onto a new
//! background, given either as an image or as a text prompt.

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use formy_models::{JobResult, JobType};

use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::params::{optional_bool, optional_str, required_str, Params};
use crate::pipeline::Pipeline;

use super::utils::assemble_result;

const SEGMENT_PERSON: &str = "segment_person";
const REPLACE_BACKGROUND: &str = "replace_background";

enum Background {
    Image(String),
    Prompt(String),
}

struct Inputs {
    source_image: String,
    background: Background,
    edge_refine: Option<bool>,
}

impl Inputs {
    fn parse(params: &Params) -> PipelineResult<Self> {
        let source_image = required_str(params, &["source_image"])?;

        // An explicit image wins over a prompt.
        let background = match optional_str(params, &["background_image"])? {
            Some(image) => Background::Image(image),
            None => match optional_str(params, &["background_prompt"])? {
                Some(prompt) => Background::Prompt(prompt),
                None => {
                    return Err(PipelineError::invalid_parameters(
                        "either 'background_image' or 'background_prompt' is required",
                    ))
                }
            },
        };

        Ok(Self {
            source_image,
            background,
            edge_refine: optional_bool(params, "edge_refine")?,
        })
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct BackgroundReplacePipeline;

impl BackgroundReplacePipeline {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Pipeline for BackgroundReplacePipeline {
    fn name(&self) -> &'static str {
        "background_replace"
    }

    fn job_type(&self) -> JobType {
        JobType::BackgroundReplace
    }

    fn validate(&self, params: &Params) -> PipelineResult<()> {
        Inputs::parse(params).map(|_| ())
    }

    async fn process(&self, params: &Params, ctx: &PipelineContext) -> PipelineResult<JobResult> {
        let inputs = Inputs::parse(params)?;

        ctx.report(10, "segmenting person").await;
        let segmented = ctx
            .call(SEGMENT_PERSON, json!({ "image": inputs.source_image }))
            .await?;
        let mask = segmented.require("mask")?.clone();

        ctx.report(50, "replacing background").await;
        let mut payload = json!({
            "source_image": inputs.source_image,
            "mask": mask,
        });
        match inputs.background {
            Background::Image(image) => payload["background_image"] = Value::String(image),
            Background::Prompt(prompt) => payload["background_prompt"] = Value::String(prompt),
        }
        if let Some(refine) = inputs.edge_refine {
            payload["edge_refine"] = Value::Bool(refine);
        }
        let replaced = ctx.call(REPLACE_BACKGROUND, payload).await?;

        let result = assemble_result(self.name(), &replaced)?;
        ctx.report(100, "completed").await;

        info!(job_id = %ctx.job_id(), output = %result.output_image, "Background replace completed");
        Ok(result)
    }
}
