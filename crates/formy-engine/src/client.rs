//! Engine HTTP client.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::comfyui::ComfyUiEngineClient;
use crate::error::{EngineError, EngineResult};
use crate::metrics::record_call;
use crate::types::{EngineRequest, EngineResponse, HealthResponse, OperationBody};

/// Invokes operations on the remote image-generation engine.
///
/// Implementations classify every failure; they never retry.
#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn invoke(&self, request: EngineRequest) -> EngineResult<EngineResponse>;

    /// Whether the engine reports itself ready. Only used for startup logs.
    async fn health_check(&self) -> EngineResult<bool> {
        Ok(true)
    }

    /// Address of the engine, for logs.
    fn endpoint(&self) -> &str {
        "in-process"
    }
}

/// Engine protocol spoken by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// One synchronous `POST /v1/operations/{operation}` per call
    Http,
    /// ComfyUI workflow submission and history polling
    ComfyUi,
}

impl EngineKind {
    pub fn parse(value: &str) -> EngineResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "http" => Ok(EngineKind::Http),
            "comfyui" => Ok(EngineKind::ComfyUi),
            other => Err(EngineError::Config(format!(
                "unknown ENGINE_KIND '{other}', expected 'http' or 'comfyui'"
            ))),
        }
    }

    /// Read `ENGINE_KIND`, defaulting to `http`.
    pub fn from_env() -> EngineResult<Self> {
        match std::env::var("ENGINE_KIND") {
            Ok(value) if !value.is_empty() => Self::parse(&value),
            _ => Ok(EngineKind::Http),
        }
    }

    /// Build the client for this protocol from environment variables.
    pub fn connect(self) -> EngineResult<Arc<dyn EngineClient>> {
        match self {
            EngineKind::Http => Ok(Arc::new(HttpEngineClient::from_env()?)),
            EngineKind::ComfyUi => Ok(Arc::new(ComfyUiEngineClient::from_env()?)),
        }
    }
}

/// How the API key is presented to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthType {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `X-API-Key: <key>`
    ApiKey,
    /// `<header>: <key>`
    Custom(String),
}

impl AuthType {
    fn parse(kind: &str, header: Option<String>) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "api_key" | "apikey" => AuthType::ApiKey,
            "custom" => AuthType::Custom(header.unwrap_or_else(|| "Authorization".to_string())),
            _ => AuthType::Bearer,
        }
    }
}

/// Configuration for the engine client.
#[derive(Debug, Clone)]
pub struct EngineClientConfig {
    /// Base URL of the engine
    pub base_url: String,
    /// Credential, if the engine requires one
    pub api_key: Option<String>,
    /// Credential presentation
    pub auth_type: AuthType,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl Default for EngineClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8188".to_string(),
            api_key: None,
            auth_type: AuthType::Bearer,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ENGINE_URL")
                .unwrap_or_else(|_| "http://localhost:8188".to_string()),
            api_key: std::env::var("ENGINE_API_KEY").ok().filter(|k| !k.is_empty()),
            auth_type: AuthType::parse(
                &std::env::var("ENGINE_AUTH_TYPE").unwrap_or_else(|_| "bearer".to_string()),
                std::env::var("ENGINE_AUTH_HEADER").ok(),
            ),
            connect_timeout: Duration::from_secs(
                std::env::var("ENGINE_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
        }
    }

    /// Set the API key.
    pub fn with_api_key(mut self, api_key: impl Into<String>, auth_type: AuthType) -> Self {
        self.api_key = Some(api_key.into());
        self.auth_type = auth_type;
        self
    }
}

/// HTTP implementation of [`EngineClient`].
pub struct HttpEngineClient {
    http: Client,
    config: EngineClientConfig,
}

impl HttpEngineClient {
    /// Create a new engine client.
    pub fn new(config: EngineClientConfig) -> EngineResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> EngineResult<Self> {
        Self::new(EngineClientConfig::from_env())
    }

    fn operation_url(&self, operation: &str) -> String {
        format!(
            "{}/v1/operations/{}",
            self.config.base_url.trim_end_matches('/'),
            operation
        )
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let Some(key) = &self.config.api_key else {
            return builder;
        };
        match &self.config.auth_type {
            AuthType::Bearer => builder.bearer_auth(key),
            AuthType::ApiKey => builder.header("X-API-Key", key),
            AuthType::Custom(header) => builder.header(header.as_str(), key),
        }
    }

    async fn send(&self, request: &EngineRequest) -> EngineResult<EngineResponse> {
        let url = self.operation_url(&request.operation);
        debug!(operation = %request.operation, "Sending engine request to {}", url);

        let body = OperationBody {
            operation: &request.operation,
            payload: &request.payload,
        };

        let response = self
            .authorize(self.http.post(&url))
            .timeout(request.deadline)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::from_transport(&request.operation, request.deadline, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| EngineError::from_transport(&request.operation, request.deadline, e))?;

        serde_json::from_slice(&bytes).map_err(|e| EngineError::invalid_response(e.to_string()))
    }
}

#[async_trait]
impl EngineClient for HttpEngineClient {
    async fn invoke(&self, request: EngineRequest) -> EngineResult<EngineResponse> {
        within_deadline(&request, self.send(&request)).await
    }

    /// Check if the engine is reachable and healthy.
    async fn health_check(&self) -> EngineResult<bool> {
        let url = format!("{}/health", self.config.base_url.trim_end_matches('/'));

        match self.http.get(&url).timeout(Duration::from_secs(5)).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response
                    .json()
                    .await
                    .map_err(|e| EngineError::invalid_response(e.to_string()))?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("Engine health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Engine health check error: {}", e);
                Ok(false)
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.config.base_url
    }
}

/// Run one engine exchange under the request deadline, then record metrics
/// and log the failure class.
///
/// The engine enforces no deadline of its own.
pub(crate) async fn within_deadline<F>(
    request: &EngineRequest,
    exchange: F,
) -> EngineResult<EngineResponse>
where
    F: Future<Output = EngineResult<EngineResponse>>,
{
    let started = Instant::now();

    let result = match tokio::time::timeout(request.deadline, exchange).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::timeout(&request.operation, request.deadline)),
    };

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.kind().as_str(),
    };
    record_call(&request.operation, outcome, started.elapsed());

    if let Err(e) = &result {
        warn!(operation = %request.operation, kind = %e.kind(), "Engine call failed: {}", e);
    }

    result
}

/// Map a non-success status to the failure taxonomy. Only server-side
/// overload is worth another attempt.
pub(crate) fn classify_status(status: StatusCode, body: String) -> EngineError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        EngineError::unavailable(format!("engine returned {}: {}", status, body))
    } else {
        EngineError::rejected(status.as_u16(), body)
    }
}
