//! # Feature: Conversation State
//!
//! Per-user persona, model, thinking toggle and message history, kept in
//! memory for the lifetime of the extension that owns the store.
//!
//! Each user's state sits behind its own async mutex. A chat turn holds that
//! mutex from compose to commit, so a second message from the same user waits
//! for the first to finish while other users proceed independently.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Copy-then-commit turns replace in-place history mutation
//! - 1.0.0: Initial per-user store

use crate::backend::{CapabilitySet, SystemPromptStyle};
use crate::error::{RelayError, Result};
use crate::personas::PersonaRegistry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub type UserId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Image { mime_type: String, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Message {
            role,
            parts: vec![Part::Text(text.into())],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// All text segments joined, images skipped
    pub fn joined_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text(t) => Some(t.as_str()),
                Part::Image { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn images(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.parts.iter().filter_map(|p| match p {
            Part::Image { mime_type, data } => Some((mime_type.as_str(), data.as_slice())),
            Part::Text(_) => None,
        })
    }
}

/// One user's conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationState {
    pub persona_key: String,
    pub selected_model: String,
    pub thinking_enabled: bool,
    pub history: Vec<Message>,
}

impl ConversationState {
    /// Appends a completed turn. This is the only way history grows.
    pub fn commit_turn(&mut self, user: Message, assistant_text: impl Into<String>) {
        self.history.push(user);
        self.history.push(Message::assistant(assistant_text));
    }
}

/// In-memory store of conversation state keyed by user
pub struct ConversationStore {
    states: DashMap<UserId, Arc<Mutex<ConversationState>>>,
    personas: Arc<PersonaRegistry>,
    style: SystemPromptStyle,
    default_model: String,
}

impl ConversationStore {
    pub fn new(personas: Arc<PersonaRegistry>, style: SystemPromptStyle, default_model: impl Into<String>) -> Self {
        ConversationStore {
            states: DashMap::new(),
            personas,
            style,
            default_model: default_model.into(),
        }
    }

    pub fn personas(&self) -> &PersonaRegistry {
        &self.personas
    }

    pub fn style(&self) -> SystemPromptStyle {
        self.style
    }

    /// History a conversation starts with under the given persona
    pub fn seed_history(&self, persona_key: &str) -> Result<Vec<Message>> {
        match self.style {
            SystemPromptStyle::InHistory => {
                let prompt = self.personas.get(persona_key)?;
                Ok(vec![Message::system(prompt)])
            }
            SystemPromptStyle::Separate => Ok(Vec::new()),
        }
    }

    fn fresh_state(&self) -> ConversationState {
        let persona_key = self.personas.default_key().to_string();
        // The registry guarantees its default key exists.
        let history = self.seed_history(&persona_key).unwrap_or_default();
        ConversationState {
            persona_key,
            selected_model: self.default_model.clone(),
            thinking_enabled: false,
            history,
        }
    }

    /// Existing state for the user, or a newly seeded one
    pub fn get_or_create(&self, user_id: UserId) -> Arc<Mutex<ConversationState>> {
        self.states
            .entry(user_id)
            .or_insert_with(|| Arc::new(Mutex::new(self.fresh_state())))
            .clone()
    }

    /// Exclusive access to the user's state; held for a whole chat turn
    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<ConversationState> {
        self.get_or_create(user_id).lock_owned().await
    }

    /// Copy of the user's current state
    pub async fn snapshot(&self, user_id: UserId) -> ConversationState {
        self.lock(user_id).await.clone()
    }

    /// Clears history back to the seed for the current persona
    pub async fn reset(&self, user_id: UserId) -> Result<()> {
        let mut state = self.lock(user_id).await;
        state.history = self.seed_history(&state.persona_key)?;
        Ok(())
    }

    /// Switches persona and clears history; unknown keys leave state untouched
    pub async fn set_persona(&self, user_id: UserId, key: &str) -> Result<()> {
        if !self.personas.contains(key) {
            return Err(RelayError::UnknownPersona {
                key: key.to_string(),
                available: self.personas.list(),
            });
        }
        let history = self.seed_history(key)?;

        let mut state = self.lock(user_id).await;
        state.persona_key = key.to_string();
        state.history = history;
        Ok(())
    }

    /// Switches model and clears history; thinking is turned off if the new model lacks it
    pub async fn set_model(&self, user_id: UserId, model: &str, capabilities: &CapabilitySet) -> Result<()> {
        let mut state = self.lock(user_id).await;
        state.selected_model = model.to_string();
        state.history = self.seed_history(&state.persona_key)?;
        if !capabilities.thinking {
            state.thinking_enabled = false;
        }
        Ok(())
    }

    /// Sets the thinking toggle. `capabilities` were resolved for `model`; enabling
    /// is refused when the user has switched to another model since.
    pub async fn set_thinking(
        &self,
        user_id: UserId,
        enabled: bool,
        model: &str,
        capabilities: &CapabilitySet,
    ) -> Result<()> {
        let mut state = self.lock(user_id).await;
        if enabled && (!capabilities.thinking || state.selected_model != model) {
            return Err(RelayError::UnsupportedFeature {
                feature: "thinking".to_string(),
                model: state.selected_model.clone(),
            });
        }
        state.thinking_enabled = enabled;
        Ok(())
    }

    /// Number of users with state
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}
