//! Hosted LLM backend speaking the Gemini `generateContent` API.
//!
//! The persona travels in `system_instruction`; the reply is a single JSON
//! object. The API has no per-model capability endpoint we rely on, so the
//! capability set is fixed: vision, no thinking toggle, no streaming.

use super::{
    BackendDescriptor, BackendKind, Capability, CapabilitySet, ChatBackend, ChatRequest,
    SystemPromptStyle,
};
use crate::collector::collect_single;
use crate::conversation::{Message, Part, Role};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::debug;
use serde::Serialize;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Debug, Serialize, PartialEq)]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Content {
    pub role: &'static str,
    pub parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct SystemInstruction {
    pub parts: Vec<WirePart>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum WirePart {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Debug, Serialize, PartialEq)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl GenerateContentRequest {
    pub fn from_request(request: &ChatRequest) -> Self {
        let contents = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(Content::from_message)
            .collect();

        GenerateContentRequest {
            contents,
            system_instruction: request.system_instruction.as_ref().map(|text| SystemInstruction {
                parts: vec![WirePart::Text { text: text.clone() }],
            }),
        }
    }
}

impl Content {
    fn from_message(message: &Message) -> Self {
        let role = match message.role {
            Role::Assistant => "model",
            Role::User | Role::System => "user",
        };
        let parts = message
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => WirePart::Text { text: text.clone() },
                Part::Image { mime_type, data } => WirePart::InlineData {
                    inline_data: InlineData {
                        mime_type: mime_type.clone(),
                        data: BASE64.encode(data),
                    },
                },
            })
            .collect();
        Content { role, parts }
    }
}

pub struct GeminiBackend {
    descriptor: BackendDescriptor,
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: &str, model: &str) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        GeminiBackend {
            descriptor: BackendDescriptor {
                name: "gemini".to_string(),
                endpoint: base_url.clone(),
                kind: BackendKind::HostedLlm,
            },
            client,
            base_url,
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl ChatBackend for GeminiBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn system_prompt_style(&self) -> SystemPromptStyle {
        SystemPromptStyle::Separate
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn fetch_capabilities(&self, _model: &str) -> Result<CapabilitySet> {
        Ok(CapabilitySet::empty().with(Capability::Vision))
    }

    async fn fetch_models(&self) -> Result<Vec<String>> {
        Ok(vec![self.model.clone()])
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        let payload = GenerateContentRequest::from_request(request);
        debug!(
            "Sending {} contents to Gemini model {}",
            payload.contents.len(),
            request.model
        );

        let response = self
            .client
            .post(self.generate_url(&request.model))
            .query(&[("key", self.api_key.as_str())])
            .json(&payload)
            .send()
            .await
            .map_err(|e| RelayError::Connection(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| RelayError::Connection(e.without_url().to_string()))?;

        if !status.is_success() {
            // Error bodies carry `{"error": {"message": ...}}`; fall back to raw text
            return match collect_single(&body, status.as_u16()) {
                Err(err @ RelayError::Backend { .. }) => Err(err),
                _ => Err(RelayError::Backend {
                    status: status.as_u16(),
                    message: String::from_utf8_lossy(&body).trim().to_string(),
                }),
            };
        }

        collect_single(&body, status.as_u16())
    }
}
