//! Backend adapter contract.
//!
//! Chat backends differ in how they carry the system prompt, whether they
//! stream, and how they report capabilities. The relay only talks to them
//! through [`ChatBackend`]; the image pipeline has its own [`ImageBackend`]
//! because its request/response shape has nothing in common with chat.

pub mod comfyui;
pub mod gemini;
pub mod ollama;

use crate::conversation::Message;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;

pub use comfyui::ComfyUiBackend;
pub use gemini::GeminiBackend;
pub use ollama::OllamaBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    HostedLlm,
    LocalLlm,
    LocalImageGen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Vision,
    Thinking,
    Streaming,
}

impl Capability {
    /// Parses the capability names model servers report (`"vision"`, `"thinking"`, ...)
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "vision" => Some(Capability::Vision),
            "thinking" => Some(Capability::Thinking),
            "streaming" => Some(Capability::Streaming),
            _ => None,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Vision => "vision",
            Capability::Thinking => "thinking",
            Capability::Streaming => "streaming",
        };
        f.write_str(name)
    }
}

/// Set of capability flags a backend reported for one model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    pub vision: bool,
    pub thinking: bool,
    pub streaming: bool,
}

impl CapabilitySet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        match capability {
            Capability::Vision => self.vision = true,
            Capability::Thinking => self.thinking = true,
            Capability::Streaming => self.streaming = true,
        }
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        match capability {
            Capability::Vision => self.vision,
            Capability::Thinking => self.thinking,
            Capability::Streaming => self.streaming,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::empty()
    }

    /// Builds a set from reported names, ignoring ones we don't model (e.g. `"completion"`, `"tools"`)
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .filter_map(|n| Capability::parse(n.as_ref()))
            .fold(Self::empty(), Self::with)
    }
}

/// Static description of a configured backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub name: String,
    pub endpoint: String,
    pub kind: BackendKind,
}

/// Where the persona instruction travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemPromptStyle {
    /// As a standing system-role entry at the head of the history
    InHistory,
    /// As a distinct top-level field next to the history
    Separate,
}

/// Backend-neutral chat request produced by the composer
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    /// Set only for [`SystemPromptStyle::Separate`] backends
    pub system_instruction: Option<String>,
    pub messages: Vec<Message>,
    /// `None` when the model has no thinking mode; `Some(false)` means explicitly disabled
    pub think: Option<bool>,
}

/// A text generation backend (hosted or local LLM)
#[async_trait]
pub trait ChatBackend: Send + Sync {
    fn descriptor(&self) -> &BackendDescriptor;

    fn system_prompt_style(&self) -> SystemPromptStyle;

    /// Model a fresh conversation starts with
    fn default_model(&self) -> &str;

    /// Raw capability query; the resolver handles caching and fail-open
    async fn fetch_capabilities(&self, model: &str) -> Result<CapabilitySet>;

    /// Raw model listing query
    async fn fetch_models(&self) -> Result<Vec<String>>;

    /// Sends the request and collects the full reply text
    async fn complete(&self, request: &ChatRequest) -> Result<String>;
}

/// Output of a completed image generation job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// A text-to-image backend
#[async_trait]
pub trait ImageBackend: Send + Sync {
    fn descriptor(&self) -> &BackendDescriptor;

    async fn generate(&self, positive: &str, negative: &str) -> Result<GeneratedImage>;
}
