// Core layer - domain types and errors
pub mod config;
pub mod error;
pub mod personas;

// Conversation pipeline
pub mod capabilities;
pub mod collector;
pub mod composer;
pub mod conversation;

// Backends and orchestration
pub mod backend;
pub mod controller;
pub mod extensions;
pub mod relay;

// Discord adapter
pub mod commands;

pub use config::Config;
pub use controller::{Command, InboundMessage, RelayController, Reply, ReplyBody};
pub use error::{RelayError, Result};
pub use extensions::{ExtensionName, ExtensionRegistry};
pub use personas::PersonaRegistry;
pub use relay::{ChatRelay, ImageRelay};
