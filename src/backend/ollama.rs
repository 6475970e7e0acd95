//! Local LLM backend speaking the Ollama REST API.
//!
//! `/chat` streams newline-delimited JSON fragments; `/tags` lists installed
//! models and `/show` reports a model's capabilities. The persona is the
//! first (system) message of the history.

use super::{
    BackendDescriptor, BackendKind, Capability, CapabilitySet, ChatBackend, ChatRequest,
    SystemPromptStyle,
};
use crate::collector::collect_stream;
use crate::conversation::{Message, Role};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, info};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/api";
pub const DEFAULT_MODEL: &str = "gemma3:12b-it-qat";

#[derive(Debug, Serialize, PartialEq)]
pub struct OllamaChatRequest {
    pub model: String,
    pub messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub think: Option<bool>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct OllamaMessage {
    pub role: &'static str,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl OllamaChatRequest {
    pub fn from_request(request: &ChatRequest) -> Self {
        OllamaChatRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(OllamaMessage::from_message).collect(),
            think: request.think,
        }
    }
}

impl OllamaMessage {
    fn from_message(message: &Message) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        OllamaMessage {
            role,
            content: message.joined_text(),
            images: message.images().map(|(_, data)| BASE64.encode(data)).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShowResponse {
    #[serde(default)]
    capabilities: Vec<String>,
}

pub struct OllamaBackend {
    descriptor: BackendDescriptor,
    client: reqwest::Client,
    base_url: String,
    default_model: String,
}

impl OllamaBackend {
    pub fn new(client: reqwest::Client, base_url: &str, default_model: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        OllamaBackend {
            descriptor: BackendDescriptor {
                name: "ollama".to_string(),
                endpoint: base_url.clone(),
                kind: BackendKind::LocalLlm,
            },
            client,
            base_url,
            default_model: default_model.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    // Ollama error bodies look like {"error": "..."}
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);
    Err(RelayError::Backend {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ChatBackend for OllamaBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn system_prompt_style(&self) -> SystemPromptStyle {
        SystemPromptStyle::InHistory
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn fetch_capabilities(&self, model: &str) -> Result<CapabilitySet> {
        let response = self
            .client
            .post(self.url("show"))
            .json(&serde_json::json!({ "name": model }))
            .send()
            .await?;
        let show: ShowResponse = error_for_status(response).await?.json().await?;
        // Every /chat reply from Ollama is streamed
        Ok(CapabilitySet::from_names(&show.capabilities).with(Capability::Streaming))
    }

    async fn fetch_models(&self) -> Result<Vec<String>> {
        let response = self.client.get(self.url("tags")).send().await?;
        let tags: TagsResponse = error_for_status(response).await?.json().await?;
        Ok(tags.models.into_iter().filter_map(|m| m.name).filter(|n| !n.is_empty()).collect())
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let payload = OllamaChatRequest::from_request(request);
        if let Some(think) = payload.think {
            info!("Thinking mode {} for {}", if think { "enabled" } else { "disabled" }, payload.model);
        }
        debug!("Sending {} messages to Ollama model {}", payload.messages.len(), payload.model);

        let response = self
            .client
            .post(self.url("chat"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| RelayError::Connection(e.to_string()))?;
        let response = error_for_status(response).await?;
        let status = response.status().as_u16();

        collect_stream(response.bytes_stream(), status).await
    }
}
