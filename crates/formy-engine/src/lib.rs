//! Client for the remote image-generation engine.
//!
//! The engine accepts an operation name and a JSON payload and answers with
//! named outputs, either over one synchronous HTTP call or through a ComfyUI
//! workflow run. This crate owns request/response translation, client-side
//! deadline enforcement and failure classification into
//! [`formy_models::ErrorKind`].

pub mod client;
pub mod comfyui;
pub mod error;
pub mod metrics;
pub mod types;

pub use client::{AuthType, EngineClient, EngineClientConfig, EngineKind, HttpEngineClient};
pub use comfyui::{ComfyUiConfig, ComfyUiEngineClient};
pub use error::{EngineError, EngineResult};
pub use types::{EngineRequest, EngineResponse};
