//! Relay error taxonomy.
//!
//! Every variant maps to exactly one user-facing sentence via
//! [`RelayError::user_message`], so the Discord layer never has to inspect
//! backend details to decide what to show.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    /// Neither prompt text nor an image attachment was supplied
    #[error("empty input")]
    EmptyInput,

    #[error("unknown persona '{key}'")]
    UnknownPersona { key: String, available: Vec<String> },

    /// The active model does not report the requested capability
    #[error("model '{model}' does not support {feature}")]
    UnsupportedFeature { feature: String, model: String },

    #[error("unknown model '{name}'")]
    UnknownModel { name: String, available: Vec<String> },

    #[error("no models available")]
    NoModelsAvailable,

    /// Backend unreachable, transport failure or timeout
    #[error("connection error: {0}")]
    Connection(String),

    /// Backend answered with a non-success status or an application-level error
    #[error("backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    /// Backend payload could not be parsed at all
    #[error("decode error: {0}")]
    Decode(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("unknown extension '{name}'")]
    UnknownExtension { name: String, available: Vec<String> },

    #[error("extension '{0}' is already loaded")]
    ExtensionAlreadyLoaded(String),

    #[error("extension '{0}' is not loaded")]
    ExtensionNotLoaded(String),

    /// Two chat extensions would claim the same commands
    #[error("extension '{requested}' conflicts with loaded extension '{loaded}'")]
    ExtensionConflict { requested: String, loaded: String },

    #[error("extension '{name}' failed to initialize: {reason}")]
    ExtensionInit { name: String, reason: String },

    #[error("no chat extension loaded")]
    NoChatExtension,

    #[error("image generation unavailable")]
    ImageGenUnavailable,
}

impl RelayError {
    /// Text shown to the user in the originating channel
    pub fn user_message(&self) -> String {
        match self {
            RelayError::EmptyInput => "Please type a message or attach an image.".to_string(),
            RelayError::UnknownPersona { key, available } => format!(
                "Persona `{key}` does not exist. Available personas: {}",
                available.join(", ")
            ),
            RelayError::UnsupportedFeature { feature, model } => {
                format!("The selected model `{model}` does not support {feature}.")
            }
            RelayError::UnknownModel { name, available } => format!(
                "Model `{name}` is not installed. Available models: {}",
                available.join(", ")
            ),
            RelayError::NoModelsAvailable => "No models are available. Check that the model server is running and has models installed.".to_string(),
            RelayError::Connection(detail) => {
                format!("Could not reach the backend server ({detail}). Check that it is running and reachable.")
            }
            RelayError::Backend { status, message } => {
                format!("The backend returned an error ({status}): {message}")
            }
            RelayError::Decode(detail) => {
                format!("The backend response could not be decoded: {detail}")
            }
            RelayError::PermissionDenied => "You don't have permission for it.".to_string(),
            RelayError::UnknownExtension { name, available } => format!(
                "Extension `{name}` does not exist. Available extensions: {}",
                available.join(", ")
            ),
            RelayError::ExtensionAlreadyLoaded(name) => format!("Extension `{name}` is already loaded."),
            RelayError::ExtensionNotLoaded(name) => format!("Extension `{name}` is not loaded."),
            RelayError::ExtensionConflict { requested, loaded } => format!(
                "Cannot load `{requested}` while `{loaded}` is loaded. Unload `{loaded}` first."
            ),
            RelayError::ExtensionInit { name, reason } => {
                format!("Extension `{name}` failed to load: {reason}")
            }
            RelayError::NoChatExtension => "No chat extension is loaded. Ask the bot owner to load one.".to_string(),
            RelayError::ImageGenUnavailable => "Image generation is not loaded. Ask the bot owner to load `image_gen`.".to_string(),
        }
    }

    /// Whether the failure came from talking to a backend (as opposed to user input)
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            RelayError::Connection(_) | RelayError::Backend { .. } | RelayError::Decode(_)
        )
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RelayError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            RelayError::Backend {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            RelayError::Connection(err.to_string())
        }
    }
}

impl From<tokio::time::error::Elapsed> for RelayError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RelayError::Connection("request timed out".to_string())
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
