//! # Feature: Chat Relay
//!
//! One relay per loaded backend extension. A chat turn locks the user's
//! conversation, resolves the model's capabilities, composes the request on a
//! copy of the history, calls the backend, and commits the user/assistant pair
//! only when a reply came back. Failures leave the history as it was.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 1.2.0: Image generation relay with bounded job time
//! - 1.1.0: Model selection validated against the backend's installed models
//! - 1.0.0: Initial mention-driven chat relay

use crate::backend::{CapabilitySet, ChatBackend, GeneratedImage, ImageBackend};
use crate::capabilities::CapabilityResolver;
use crate::composer::{compose, ImageInput};
use crate::conversation::{ConversationState, ConversationStore, UserId};
use crate::error::{RelayError, Result};
use crate::personas::PersonaRegistry;
use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout, timeout_at, Instant};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Assistant reply for one chat turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReply {
    /// Capitalized persona key
    pub title: String,
    pub text: String,
    /// The attachment was not sent because the model has no vision
    pub image_dropped: bool,
}

pub struct ChatRelay {
    backend: Arc<dyn ChatBackend>,
    resolver: CapabilityResolver,
    store: ConversationStore,
    request_timeout: Duration,
}

impl ChatRelay {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        personas: Arc<PersonaRegistry>,
        cache_ttl: Duration,
        request_timeout: Duration,
    ) -> Self {
        let store = ConversationStore::new(
            personas,
            backend.system_prompt_style(),
            backend.default_model(),
        );
        ChatRelay {
            resolver: CapabilityResolver::new(backend.clone(), cache_ttl)
                .with_lookup_timeout(request_timeout),
            backend,
            store,
            request_timeout,
        }
    }

    pub fn backend_name(&self) -> &str {
        &self.backend.descriptor().name
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn personas(&self) -> &PersonaRegistry {
        self.store.personas()
    }

    /// Runs one chat turn for `user`.
    ///
    /// Turns for the same user are serialized on the user's lock; the
    /// backend call happens while holding it. Capability lookup and the
    /// backend call share one deadline of `request_timeout`.
    pub async fn chat(&self, user: UserId, prompt: &str, image: Option<ImageInput>) -> Result<ChatReply> {
        let mut state = self.store.lock(user).await;
        let deadline = Instant::now() + self.request_timeout;
        let capabilities = self.resolver.resolve(&state.selected_model).await;

        let turn = compose(
            &state,
            self.store.personas(),
            self.store.style(),
            &capabilities,
            prompt,
            image,
        )?;

        debug!(
            "User {user} -> {} ({} messages, model {})",
            self.backend_name(),
            turn.request.messages.len(),
            turn.request.model
        );

        let text = match timeout_at(deadline, self.backend.complete(&turn.request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                error!("{} request for user {user} failed: {e}", self.backend_name());
                return Err(e);
            }
            Err(elapsed) => {
                error!(
                    "{} request for user {user} timed out after {:?}",
                    self.backend_name(),
                    self.request_timeout
                );
                return Err(elapsed.into());
            }
        };

        debug!("User {user} <- {} chars", text.len());
        state.commit_turn(turn.user_message, text.clone());

        Ok(ChatReply {
            title: PersonaRegistry::title(&state.persona_key),
            text,
            image_dropped: turn.image_dropped,
        })
    }

    pub async fn select_persona(&self, user: UserId, key: &str) -> Result<()> {
        self.store.set_persona(user, key).await?;
        info!("User {user} switched persona to {key}");
        Ok(())
    }

    pub async fn reset(&self, user: UserId) -> Result<()> {
        self.store.reset(user).await
    }

    /// Installed models, `NoModelsAvailable` if the backend lists none or cannot be reached
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let models = self.resolver.available_models().await;
        if models.is_empty() {
            return Err(RelayError::NoModelsAvailable);
        }
        Ok(models)
    }

    pub async fn select_model(&self, user: UserId, name: &str) -> Result<()> {
        let available = self.list_models().await?;
        if !available.iter().any(|m| m == name) {
            return Err(RelayError::UnknownModel {
                name: name.to_string(),
                available,
            });
        }

        // A model swapped on the server should be re-queried on selection
        self.resolver.invalidate(name);
        let capabilities = self.resolver.resolve(name).await;
        self.store.set_model(user, name, &capabilities).await?;
        info!("User {user} selected model {name} ({capabilities:?})");
        Ok(())
    }

    pub async fn enable_thinking(&self, user: UserId) -> Result<()> {
        let model = self.store.snapshot(user).await.selected_model;
        let capabilities = self.resolver.resolve(&model).await;
        self.store.set_thinking(user, true, &model, &capabilities).await
    }

    pub async fn disable_thinking(&self, user: UserId) -> Result<()> {
        let model = self.store.snapshot(user).await.selected_model;
        self.store
            .set_thinking(user, false, &model, &CapabilitySet::empty())
            .await
    }

    pub async fn snapshot(&self, user: UserId) -> ConversationState {
        self.store.snapshot(user).await
    }
}

/// Image generation relay; jobs are bounded by the request timeout
pub struct ImageRelay {
    backend: Arc<dyn ImageBackend>,
    request_timeout: Duration,
}

impl ImageRelay {
    pub fn new(backend: Arc<dyn ImageBackend>, request_timeout: Duration) -> Self {
        ImageRelay {
            backend,
            request_timeout,
        }
    }

    pub async fn generate(&self, positive: &str, negative: &str) -> Result<GeneratedImage> {
        if positive.trim().is_empty() {
            return Err(RelayError::EmptyInput);
        }
        info!("Generating image on {}", self.backend.descriptor().name);
        let image = timeout(self.request_timeout, self.backend.generate(positive, negative)).await??;
        debug!("Generated {} ({} bytes)", image.filename, image.bytes.len());
        Ok(image)
    }
}
