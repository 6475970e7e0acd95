//! # Feature: Relay Controller
//!
//! Platform-neutral dispatch for mention messages and slash commands. Every
//! handler returns a [`Reply`]; failures are turned into one readable reply
//! here so the Discord layer only has to deliver it.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Owner-gated extension commands and autocomplete sources
//! - 1.0.0: Initial chat and persona commands

use crate::composer::ImageInput;
use crate::conversation::UserId;
use crate::error::{RelayError, Result};
use crate::extensions::{ExtensionName, ExtensionRegistry};
use crate::relay::ChatReply;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

/// Max autocomplete choices Discord accepts
pub const MAX_CHOICES: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SelectPersona(String),
    Reset,
    /// `None` lists the installed models
    SelectModel(Option<String>),
    EnableThinking,
    DisableThinking,
    GenerateImage { positive: String, negative: Option<String> },
    Load(String),
    Unload(String),
    Reload(String),
}

impl Command {
    /// Builds a command from a slash command name and its string options
    pub fn from_slash(name: &str, options: &HashMap<String, String>) -> Option<Command> {
        let opt = |key: &str| options.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let command = match name {
            "select_persona" => Command::SelectPersona(opt("persona")?),
            "reset" => Command::Reset,
            "select_model" => Command::SelectModel(opt("model")),
            "enable_thinking" => Command::EnableThinking,
            "disable_thinking" => Command::DisableThinking,
            "generate_image" => Command::GenerateImage {
                positive: opt("positive_prompt")?,
                negative: opt("negative_prompt"),
            },
            "load" => Command::Load(opt("extension")?),
            "unload" => Command::Unload(opt("extension")?),
            "reload" => Command::Reload(opt("extension")?),
            _ => return None,
        };
        Some(command)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::SelectPersona(_) => "select_persona",
            Command::Reset => "reset",
            Command::SelectModel(_) => "select_model",
            Command::EnableThinking => "enable_thinking",
            Command::DisableThinking => "disable_thinking",
            Command::GenerateImage { .. } => "generate_image",
            Command::Load(_) => "load",
            Command::Unload(_) => "unload",
            Command::Reload(_) => "reload",
        }
    }

    pub fn requires_owner(&self) -> bool {
        matches!(self, Command::Load(_) | Command::Unload(_) | Command::Reload(_))
    }

    /// Whether the channel sees the result; everything else answers only the invoker
    pub fn is_public(&self) -> bool {
        matches!(self, Command::GenerateImage { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyBody {
    Text(String),
    Card { title: String, body: String },
    Image { filename: String, bytes: Vec<u8>, spoiler: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub body: ReplyBody,
    /// Only visible to the invoking user (slash commands only)
    pub ephemeral: bool,
}

impl Reply {
    pub fn text(text: impl Into<String>) -> Self {
        Reply {
            body: ReplyBody::Text(text.into()),
            ephemeral: false,
        }
    }

    pub fn card(title: impl Into<String>, body: impl Into<String>) -> Self {
        Reply {
            body: ReplyBody::Card {
                title: title.into(),
                body: body.into(),
            },
            ephemeral: false,
        }
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    fn from_error(err: &RelayError) -> Self {
        match err {
            RelayError::PermissionDenied => Reply::card("Access Denied", err.user_message()),
            _ => Reply::text(err.user_message()).ephemeral(),
        }
    }

    /// Plain text rendering, for logging and tests
    pub fn content(&self) -> &str {
        match &self.body {
            ReplyBody::Text(text) => text,
            ReplyBody::Card { body, .. } => body,
            ReplyBody::Image { filename, .. } => filename,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// A message that mentioned the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub author_id: UserId,
    pub text: String,
    pub attachments: Vec<Attachment>,
}

pub fn is_image_mime(mime_type: &str) -> bool {
    mime_type.starts_with("image")
}

/// Removes `<@id>` and `<@!id>` mention tokens for the given user
pub fn strip_mention(text: &str, bot_id: u64) -> String {
    match Regex::new(&format!(r"<@!?{bot_id}>")) {
        Ok(re) => re.replace_all(text, "").trim().to_string(),
        Err(_) => text.trim().to_string(),
    }
}

pub struct RelayController {
    extensions: Arc<ExtensionRegistry>,
    owner: OnceCell<UserId>,
}

impl RelayController {
    pub fn new(extensions: Arc<ExtensionRegistry>, owner: Option<UserId>) -> Self {
        let cell = OnceCell::new();
        if let Some(owner) = owner {
            let _ = cell.set(owner);
        }
        RelayController {
            extensions,
            owner: cell,
        }
    }

    pub fn extensions(&self) -> &ExtensionRegistry {
        &self.extensions
    }

    /// Sets the owner once; a configured owner is never replaced
    pub fn set_owner_if_unset(&self, owner: UserId) {
        if self.owner.set(owner).is_ok() {
            info!("Bot owner resolved to {owner}");
        }
    }

    pub fn owner(&self) -> Option<UserId> {
        self.owner.get().copied()
    }

    fn is_owner(&self, user: UserId) -> bool {
        self.owner() == Some(user)
    }

    /// Chat turn for a message that mentioned the bot (mention already stripped)
    pub async fn handle_message(&self, message: InboundMessage) -> Reply {
        let InboundMessage {
            author_id,
            text,
            attachments,
        } = message;

        let image = attachments
            .into_iter()
            .find(|a| is_image_mime(&a.mime_type))
            .map(|a| ImageInput {
                mime_type: a.mime_type,
                data: a.bytes,
            });

        match self.chat_turn(author_id, &text, image).await {
            Ok(reply) => Reply::card(reply.title, reply.text),
            Err(e) => {
                warn!("Chat turn for {author_id} failed: {e}");
                Reply::text(e.user_message())
            }
        }
    }

    async fn chat_turn(&self, user: UserId, text: &str, image: Option<ImageInput>) -> Result<ChatReply> {
        let relay = self.extensions.chat().await?;
        relay.chat(user, text, image).await
    }

    pub async fn dispatch(&self, user: UserId, command: Command) -> Reply {
        debug!("Dispatching /{} for {user}", command.name());
        match self.run(user, command).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Command failed for {user}: {e}");
                Reply::from_error(&e)
            }
        }
    }

    async fn run(&self, user: UserId, command: Command) -> Result<Reply> {
        if command.requires_owner() && !self.is_owner(user) {
            return Err(RelayError::PermissionDenied);
        }

        match command {
            Command::SelectPersona(key) => {
                let relay = self.extensions.chat().await?;
                relay.select_persona(user, &key).await?;
                Ok(Reply::text(format!(
                    "Persona set to `{}`. Conversation history cleared.",
                    key
                ))
                .ephemeral())
            }
            Command::Reset => {
                let relay = self.extensions.chat().await?;
                relay.reset(user).await?;
                Ok(Reply::text("Conversation history cleared.").ephemeral())
            }
            Command::SelectModel(None) => {
                let relay = self.extensions.chat().await?;
                let models = relay.list_models().await?;
                let current = relay.snapshot(user).await.selected_model;
                let list = models
                    .iter()
                    .map(|m| {
                        if *m == current {
                            format!("- `{m}` (selected)")
                        } else {
                            format!("- `{m}`")
                        }
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                Ok(Reply::text(format!("Available models:\n{list}")).ephemeral())
            }
            Command::SelectModel(Some(name)) => {
                let relay = self.extensions.chat().await?;
                relay.select_model(user, &name).await?;
                Ok(Reply::text(format!(
                    "Model set to `{name}`. Conversation history cleared."
                ))
                .ephemeral())
            }
            Command::EnableThinking => {
                let relay = self.extensions.chat().await?;
                relay.enable_thinking(user).await?;
                Ok(Reply::text("Thinking enabled.").ephemeral())
            }
            Command::DisableThinking => {
                let relay = self.extensions.chat().await?;
                relay.disable_thinking(user).await?;
                Ok(Reply::text("Thinking disabled.").ephemeral())
            }
            Command::GenerateImage { positive, negative } => {
                let relay = self.extensions.image().await?;
                let image = relay
                    .generate(&positive, negative.as_deref().unwrap_or(""))
                    .await?;
                Ok(Reply {
                    body: ReplyBody::Image {
                        filename: "generated.png".to_string(),
                        bytes: image.bytes,
                        spoiler: true,
                    },
                    ephemeral: false,
                })
            }
            Command::Load(name) => {
                let loaded = self.extensions.load(&name).await?;
                Ok(Reply::text(format!("**`SUCCESS`** loaded `{}`", loaded.as_str())).ephemeral())
            }
            Command::Unload(name) => {
                let unloaded = self.extensions.unload(&name).await?;
                Ok(Reply::text(format!("**`SUCCESS`** unloaded `{}`", unloaded.as_str())).ephemeral())
            }
            Command::Reload(name) => {
                let reloaded = self.extensions.reload(&name).await?;
                Ok(Reply::text(format!("**`SUCCESS`** reloaded `{}`", reloaded.as_str())).ephemeral())
            }
        }
    }

    /// Choices for an autocompleted option, filtered by what the user typed so far
    pub async fn autocomplete(&self, command: &str, partial: &str) -> Vec<String> {
        let candidates = match command {
            "select_persona" => match self.extensions.chat().await {
                Ok(relay) => relay.personas().list(),
                Err(_) => Vec::new(),
            },
            "select_model" => match self.extensions.chat().await {
                Ok(relay) => relay.list_models().await.unwrap_or_default(),
                Err(_) => Vec::new(),
            },
            "load" | "unload" | "reload" => ExtensionName::all_names(),
            _ => Vec::new(),
        };

        let partial = partial.to_lowercase();
        candidates
            .into_iter()
            .filter(|c| c.to_lowercase().contains(&partial))
            .take(MAX_CHOICES)
            .collect()
    }
}
