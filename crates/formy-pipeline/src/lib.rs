//! Image edit pipelines.
//!
//! A pipeline turns one job's parameters into an ordered sequence of engine
//! calls and assembles the final [`formy_models::JobResult`]. The
//! [`PipelineRegistry`] maps job types to pipelines.

pub mod context;
pub mod error;
pub mod params;
pub mod pipeline;
pub mod pipelines;
pub mod registry;

pub use context::{NoopProgress, PipelineContext, ProgressReporter};
pub use error::{PipelineError, PipelineResult, RegistryError};
pub use params::Params;
pub use pipeline::Pipeline;
pub use pipelines::{BackgroundReplacePipeline, HeadSwapPipeline, PoseChangePipeline};
pub use registry::PipelineRegistry;
