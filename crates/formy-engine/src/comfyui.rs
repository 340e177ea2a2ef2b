//! ComfyUI engine client.
//!
//! ComfyUI runs a workflow graph asynchronously. The client submits the graph
//! with `POST /prompt`, then polls `GET /history/{prompt_id}` until the run
//! has outputs or reports an error. Each operation maps to one workflow file.
//! Payload values go into nodes titled `input:<key>` and results are read from
//! nodes titled `output:<name>`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::client::{classify_status, within_deadline, EngineClient};
use crate::error::{EngineError, EngineResult};
use crate::types::{EngineRequest, EngineResponse};

/// Configuration for the ComfyUI client.
#[derive(Debug, Clone)]
pub struct ComfyUiConfig {
    /// Base URL of the ComfyUI server
    pub base_url: String,
    /// Directory of `<operation>.json` workflow files
    pub workflow_dir: Option<PathBuf>,
    /// Wait between history polls
    pub poll_interval: Duration,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl Default for ComfyUiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8188".to_string(),
            workflow_dir: None,
            poll_interval: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ComfyUiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("ENGINE_URL")
                .unwrap_or_else(|_| "http://localhost:8188".to_string()),
            workflow_dir: std::env::var("COMFYUI_WORKFLOW_DIR")
                .ok()
                .filter(|d| !d.is_empty())
                .map(PathBuf::from),
            poll_interval: Duration::from_millis(
                std::env::var("COMFYUI_POLL_INTERVAL_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(2000),
            ),
            connect_timeout: Duration::from_secs(
                std::env::var("ENGINE_CONNECT_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
        }
    }
}

/// ComfyUI implementation of [`EngineClient`].
pub struct ComfyUiEngineClient {
    http: Client,
    config: ComfyUiConfig,
    client_id: String,
    workflows: HashMap<String, Value>,
}

impl ComfyUiEngineClient {
    /// Create a client, loading every workflow in `workflow_dir`.
    pub fn new(config: ComfyUiConfig) -> EngineResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let workflows = match &config.workflow_dir {
            Some(dir) => load_workflows(dir)?,
            None => HashMap::new(),
        };
        info!(
            url = %config.base_url,
            workflows = workflows.len(),
            "ComfyUI client configured"
        );

        Ok(Self {
            http,
            config,
            client_id: uuid::Uuid::new_v4().to_string(),
            workflows,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> EngineResult<Self> {
        Self::new(ComfyUiConfig::from_env())
    }

    /// Register the workflow that runs `operation`.
    pub fn with_workflow(mut self, operation: impl Into<String>, workflow: Value) -> Self {
        self.workflows.insert(operation.into(), workflow);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn run(&self, request: &EngineRequest) -> EngineResult<EngineResponse> {
        let workflow = self.workflows.get(&request.operation).ok_or_else(|| {
            EngineError::Config(format!("no workflow for operation '{}'", request.operation))
        })?;
        let prompt = inject_inputs(workflow, &request.payload)?;

        let prompt_id = self.submit(request, &prompt).await?;
        debug!(operation = %request.operation, prompt_id = %prompt_id, "Workflow submitted");

        let outputs = self.wait_for_outputs(&prompt_id).await?;
        self.collect_outputs(&prompt, &outputs)
    }

    async fn submit(&self, request: &EngineRequest, prompt: &Map<String, Value>) -> EngineResult<String> {
        let response = self
            .http
            .post(self.url("prompt"))
            .json(&json!({ "prompt": prompt, "client_id": self.client_id }))
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
        let reply: Value = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::invalid_response(e.to_string()))?;

        reply
            .get("prompt_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| EngineError::invalid_response("submit reply has no prompt_id"))
    }

    /// Poll the run history until it finishes. The caller bounds the wait.
    async fn wait_for_outputs(&self, prompt_id: &str) -> EngineResult<Map<String, Value>> {
        let url = self.url(&format!("history/{prompt_id}"));
        loop {
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| EngineError::unavailable(format!("history poll failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(classify_status(status, body));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| EngineError::unavailable(format!("history poll failed: {e}")))?;
            let history: Value = serde_json::from_slice(&bytes)
                .map_err(|e| EngineError::invalid_response(e.to_string()))?;

            if let Some(entry) = history.get(prompt_id) {
                if let Some(message) = run_error(entry) {
                    return Err(EngineError::WorkflowFailed(message));
                }
                match entry.get("outputs").and_then(Value::as_object) {
                    Some(outputs) if !outputs.is_empty() => return Ok(outputs.clone()),
                    _ if run_completed(entry) => {
                        return Err(EngineError::invalid_response(
                            "workflow finished without outputs",
                        ))
                    }
                    _ => {}
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    fn collect_outputs(
        &self,
        prompt: &Map<String, Value>,
        outputs: &Map<String, Value>,
    ) -> EngineResult<EngineResponse> {
        let mut collected = Map::new();

        for (node_id, node) in prompt {
            let Some(name) = node_title(node).and_then(|t| tagged_name(t, "output")) else {
                continue;
            };
            let Some(output) = outputs.get(node_id) else {
                continue;
            };
            let value = match first_image(output) {
                Some(image) => Value::String(self.view_url(image)?),
                None => output.clone(),
            };
            collected.insert(output_key(name).to_string(), value);
        }

        // Untitled workflows: the first image of any node is the result.
        if !collected.contains_key("output_image") {
            if let Some(image) = outputs.values().find_map(first_image) {
                collected.insert("output_image".to_string(), Value::String(self.view_url(image)?));
            }
        }

        if collected.is_empty() {
            return Err(EngineError::invalid_response("workflow produced no outputs"));
        }
        Ok(EngineResponse::new(collected))
    }

    /// Download URL for an output image.
    fn view_url(&self, image: &Value) -> EngineResult<String> {
        let mut url = Url::parse(&self.url("view"))
            .map_err(|e| EngineError::Config(format!("invalid engine URL: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair(
                "filename",
                image.get("filename").and_then(Value::as_str).unwrap_or_default(),
            );
            query.append_pair(
                "type",
                image.get("type").and_then(Value::as_str).unwrap_or("output"),
            );
            if let Some(subfolder) = image
                .get("subfolder")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
            {
                query.append_pair("subfolder", subfolder);
            }
        }
        Ok(url.into())
    }
}

#[async_trait]
impl EngineClient for ComfyUiEngineClient {
    async fn invoke(&self, request: EngineRequest) -> EngineResult<EngineResponse> {
        within_deadline(&request, self.run(&request)).await
    }

    async fn health_check(&self) -> EngineResult<bool> {
        match self
            .http
            .get(self.url("system_stats"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Ok(true),
            Ok(response) => {
                warn!("ComfyUI health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("ComfyUI health check error: {}", e);
                Ok(false)
            }
        }
    }

    fn endpoint(&self) -> &str {
        &self.config.base_url
    }
}

fn load_workflows(dir: &Path) -> EngineResult<HashMap<String, Value>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        EngineError::Config(format!("cannot read workflow dir {}: {e}", dir.display()))
    })?;

    let mut workflows = HashMap::new();
    for entry in entries {
        let path = entry
            .map_err(|e| EngineError::Config(format!("cannot read workflow dir: {e}")))?
            .path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(operation) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let text = std::fs::read_to_string(&path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {e}", path.display())))?;
        let workflow: Value = serde_json::from_str(&text)
            .map_err(|e| EngineError::Config(format!("invalid workflow {}: {e}", path.display())))?;
        workflows.insert(operation.to_string(), workflow);
    }
    Ok(workflows)
}

/// Normalize a workflow to the prompt format: node id → node.
///
/// Editor exports list nodes under `nodes`; API exports are already keyed by id.
fn to_prompt(workflow: &Value) -> EngineResult<Map<String, Value>> {
    if let Some(nodes) = workflow.get("nodes").and_then(Value::as_array) {
        let mut prompt = Map::new();
        for node in nodes {
            let id = match node.get("id") {
                Some(Value::String(id)) => id.clone(),
                Some(Value::Number(id)) => id.to_string(),
                _ => continue,
            };
            prompt.insert(id, node.clone());
        }
        return Ok(prompt);
    }

    workflow
        .as_object()
        .cloned()
        .ok_or_else(|| EngineError::Config("workflow is not a JSON object".to_string()))
}

fn node_title(node: &Value) -> Option<&str> {
    node.pointer("/_meta/title")
        .or_else(|| node.get("title"))
        .and_then(Value::as_str)
}

/// `input:pose_image:2` with tag `input` → `pose_image`.
fn tagged_name<'a>(title: &'a str, tag: &str) -> Option<&'a str> {
    let rest = title.strip_prefix(tag)?.strip_prefix(':')?;
    rest.split(':').next().filter(|name| !name.is_empty())
}

/// Write payload values into the workflow's input nodes.
///
/// A value lands in the first of `image`, `text`, `value` the node already
/// declares; otherwise strings go to `image` and anything else to `value`.
fn inject_inputs(workflow: &Value, payload: &Value) -> EngineResult<Map<String, Value>> {
    let mut prompt = to_prompt(workflow)?;

    for node in prompt.values_mut() {
        let Some(key) = node_title(node)
            .and_then(|t| tagged_name(t, "input"))
            .map(str::to_owned)
        else {
            continue;
        };
        let Some(value) = payload.get(&key) else {
            continue;
        };
        let Some(node) = node.as_object_mut() else {
            continue;
        };
        let Some(inputs) = node
            .entry("inputs")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
        else {
            continue;
        };

        let field = ["image", "text", "value"]
            .into_iter()
            .find(|f| inputs.contains_key(*f))
            .unwrap_or(if value.is_string() { "image" } else { "value" });
        inputs.insert(field.to_string(), value.clone());
    }

    Ok(prompt)
}

/// Error message of a failed run, if the history entry reports one.
fn run_error(entry: &Value) -> Option<String> {
    let status = entry.get("status")?;
    if status.get("status_str").and_then(Value::as_str) != Some("error") {
        return None;
    }

    let message = status
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find_map(|m| {
            let pair = m.as_array()?;
            if pair.first()?.as_str()? != "execution_error" {
                return None;
            }
            pair.get(1)?
                .get("exception_message")?
                .as_str()
                .map(str::to_owned)
        })
        .unwrap_or_else(|| "workflow execution failed".to_string());
    Some(message)
}

fn run_completed(entry: &Value) -> bool {
    entry
        .pointer("/status/completed")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn first_image(output: &Value) -> Option<&Value> {
    output.get("images")?.as_array()?.iter().find(|image| {
        image
            .get("filename")
            .and_then(Value::as_str)
            .is_some_and(|f| !f.is_empty())
    })
}

fn output_key(name: &str) -> &str {
    match name {
        "image" => "output_image",
        "image_comparer" => "comparison_image",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workflow() -> Value {
        json!({
            "1": { "class_type": "LoadImage", "inputs": {}, "_meta": { "title": "input:source_image:1" } },
            "2": { "class_type": "CLIPTextEncode", "inputs": { "text": "" }, "_meta": { "title": "input:prompt" } },
            "3": { "class_type": "KSampler", "inputs": { "seed": 0 } },
            "9": { "class_type": "SaveImage", "inputs": {}, "_meta": { "title": "output:image:1" } }
        })
    }

    #[test]
    fn test_tagged_name() {
        assert_eq!(tagged_name("input:pose_image:2", "input"), Some("pose_image"));
        assert_eq!(tagged_name("output:image", "output"), Some("image"));
        assert_eq!(tagged_name("input:", "input"), None);
        assert_eq!(tagged_name("inputs:raw", "input"), None);
        assert_eq!(tagged_name("KSampler", "output"), None);
    }

    #[test]
    fn test_inject_inputs() {
        let prompt = inject_inputs(
            &workflow(),
            &json!({ "source_image": "/uploads/src.png", "prompt": "a red coat", "seed": 7 }),
        )
        .unwrap();

        assert_eq!(prompt["1"]["inputs"]["image"], "/uploads/src.png");
        assert_eq!(prompt["2"]["inputs"]["text"], "a red coat");
        // untitled nodes are left alone
        assert_eq!(prompt["3"]["inputs"]["seed"], 0);
    }

    #[test]
    fn test_editor_export_is_keyed_by_node_id() {
        let prompt = to_prompt(&json!({
            "nodes": [
                { "id": 4, "title": "input:raw_image:1", "inputs": {} },
                { "id": "5", "title": "output:image:1" }
            ],
            "links": []
        }))
        .unwrap();

        assert_eq!(prompt.len(), 2);
        assert_eq!(node_title(&prompt["4"]), Some("input:raw_image:1"));
        assert!(prompt.contains_key("5"));
    }

    #[test]
    fn test_run_error_message() {
        let entry = json!({
            "status": {
                "status_str": "error",
                "completed": false,
                "messages": [
                    ["execution_start", { "prompt_id": "p1" }],
                    ["execution_error", { "exception_message": "CUDA out of memory" }]
                ]
            },
            "outputs": {}
        });
        assert_eq!(run_error(&entry).as_deref(), Some("CUDA out of memory"));

        let running = json!({ "status": { "status_str": "success", "completed": false } });
        assert_eq!(run_error(&running), None);
    }

    #[test]
    fn test_collect_outputs_falls_back_to_first_image() {
        let client = ComfyUiEngineClient::new(ComfyUiConfig {
            base_url: "http://comfy:8188/".to_string(),
            ..Default::default()
        })
        .unwrap();
        let prompt = to_prompt(&json!({ "7": { "class_type": "SaveImage", "inputs": {} } })).unwrap();
        let outputs = json!({
            "7": { "images": [{ "filename": "out 1.png", "subfolder": "", "type": "output" }] }
        });

        let response = client
            .collect_outputs(&prompt, outputs.as_object().unwrap())
            .unwrap();
        assert_eq!(
            response.require_str("output_image").unwrap(),
            "http://comfy:8188/view?filename=out+1.png&type=output"
        );
    }
}
