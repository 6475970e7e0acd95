//! # Feature: Extensions
//!
//! Named units the bot owner can load, unload and reload at runtime. Each
//! chat extension owns one backend plus its own conversation store, so
//! unloading drops every user's history for that backend. Only one chat
//! extension may be loaded at a time because they answer the same commands.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

use crate::backend::{ComfyUiBackend, GeminiBackend, OllamaBackend};
use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::personas::PersonaRegistry;
use crate::relay::{ChatRelay, ImageRelay};
use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExtensionName {
    ChatGemini,
    ChatOllama,
    ImageGen,
}

impl ExtensionName {
    pub const ALL: [ExtensionName; 3] = [
        ExtensionName::ChatGemini,
        ExtensionName::ChatOllama,
        ExtensionName::ImageGen,
    ];

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.as_str() == name.trim())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtensionName::ChatGemini => "chat_gemini",
            ExtensionName::ChatOllama => "chat_ollama",
            ExtensionName::ImageGen => "image_gen",
        }
    }

    pub fn is_chat(&self) -> bool {
        matches!(self, ExtensionName::ChatGemini | ExtensionName::ChatOllama)
    }

    pub fn all_names() -> Vec<String> {
        Self::ALL.iter().map(|e| e.as_str().to_string()).collect()
    }
}

/// A constructed extension
#[derive(Clone)]
pub enum Extension {
    Chat(Arc<ChatRelay>),
    Image(Arc<ImageRelay>),
}

/// Builds extensions on load. Each call must produce fresh state.
pub trait ExtensionFactory: Send + Sync {
    fn build(&self, name: ExtensionName) -> Result<Extension>;
}

/// Builds the real backends from configuration
pub struct ConfiguredFactory {
    config: Config,
    personas: Arc<PersonaRegistry>,
    client: reqwest::Client,
}

impl ConfiguredFactory {
    pub fn new(config: Config, personas: Arc<PersonaRegistry>) -> Self {
        ConfiguredFactory {
            config,
            personas,
            client: reqwest::Client::new(),
        }
    }

    fn chat(&self, backend: Arc<dyn crate::backend::ChatBackend>) -> Extension {
        Extension::Chat(Arc::new(ChatRelay::new(
            backend,
            self.personas.clone(),
            self.config.capability_cache_ttl(),
            self.config.request_timeout(),
        )))
    }
}

impl ExtensionFactory for ConfiguredFactory {
    fn build(&self, name: ExtensionName) -> Result<Extension> {
        match name {
            ExtensionName::ChatGemini => {
                let api_key = self.config.gemini_api_key().ok_or_else(|| RelayError::ExtensionInit {
                    name: name.as_str().to_string(),
                    reason: "GEMINI_KEY is not set".to_string(),
                })?;
                let gemini = &self.config.gemini;
                Ok(self.chat(Arc::new(GeminiBackend::new(
                    self.client.clone(),
                    &gemini.base_url,
                    api_key,
                    &gemini.model,
                ))))
            }
            ExtensionName::ChatOllama => {
                let ollama = &self.config.ollama;
                Ok(self.chat(Arc::new(OllamaBackend::new(
                    self.client.clone(),
                    &ollama.base_url,
                    &ollama.default_model,
                ))))
            }
            ExtensionName::ImageGen => {
                let comfyui = &self.config.comfyui;
                let backend = ComfyUiBackend::new(
                    self.client.clone(),
                    &comfyui.server_address,
                    comfyui.workflow.clone(),
                );
                Ok(Extension::Image(Arc::new(ImageRelay::new(
                    Arc::new(backend),
                    self.config.request_timeout(),
                ))))
            }
        }
    }
}

pub struct ExtensionRegistry {
    factory: Box<dyn ExtensionFactory>,
    loaded: Mutex<BTreeMap<ExtensionName, Extension>>,
}

impl ExtensionRegistry {
    pub fn new(factory: Box<dyn ExtensionFactory>) -> Self {
        ExtensionRegistry {
            factory,
            loaded: Mutex::new(BTreeMap::new()),
        }
    }

    fn resolve_name(name: &str) -> Result<ExtensionName> {
        ExtensionName::parse(name).ok_or_else(|| RelayError::UnknownExtension {
            name: name.to_string(),
            available: ExtensionName::all_names(),
        })
    }

    pub async fn load(&self, name: &str) -> Result<ExtensionName> {
        let name = Self::resolve_name(name)?;
        let mut loaded = self.loaded.lock().await;

        if loaded.contains_key(&name) {
            return Err(RelayError::ExtensionAlreadyLoaded(name.as_str().to_string()));
        }
        if name.is_chat() {
            if let Some(other) = loaded.keys().find(|e| e.is_chat()) {
                return Err(RelayError::ExtensionConflict {
                    requested: name.as_str().to_string(),
                    loaded: other.as_str().to_string(),
                });
            }
        }

        let extension = self.factory.build(name)?;
        loaded.insert(name, extension);
        info!("Loaded extension {}", name.as_str());
        Ok(name)
    }

    pub async fn unload(&self, name: &str) -> Result<ExtensionName> {
        let name = Self::resolve_name(name)?;
        let mut loaded = self.loaded.lock().await;
        if loaded.remove(&name).is_none() {
            return Err(RelayError::ExtensionNotLoaded(name.as_str().to_string()));
        }
        info!("Unloaded extension {}", name.as_str());
        Ok(name)
    }

    /// Unload then load; the new instance starts with empty state
    pub async fn reload(&self, name: &str) -> Result<ExtensionName> {
        let name = Self::resolve_name(name)?;
        let mut loaded = self.loaded.lock().await;
        if !loaded.contains_key(&name) {
            return Err(RelayError::ExtensionNotLoaded(name.as_str().to_string()));
        }

        // Build first so a failed reload keeps the old instance running
        let extension = self.factory.build(name)?;
        loaded.insert(name, extension);
        info!("Reloaded extension {}", name.as_str());
        Ok(name)
    }

    pub async fn is_loaded(&self, name: ExtensionName) -> bool {
        self.loaded.lock().await.contains_key(&name)
    }

    pub async fn loaded_names(&self) -> Vec<String> {
        self.loaded
            .lock()
            .await
            .keys()
            .map(|e| e.as_str().to_string())
            .collect()
    }

    /// The loaded chat relay, if any
    pub async fn chat(&self) -> Result<Arc<ChatRelay>> {
        self.loaded
            .lock()
            .await
            .values()
            .find_map(|e| match e {
                Extension::Chat(relay) => Some(relay.clone()),
                Extension::Image(_) => None,
            })
            .ok_or(RelayError::NoChatExtension)
    }

    pub async fn image(&self) -> Result<Arc<ImageRelay>> {
        self.loaded
            .lock()
            .await
            .values()
            .find_map(|e| match e {
                Extension::Image(relay) => Some(relay.clone()),
                Extension::Chat(_) => None,
            })
            .ok_or(RelayError::ImageGenUnavailable)
    }
}
