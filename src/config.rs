//! # Feature: Configuration System
//!
//! Relay configuration from environment variables or a YAML file with
//! `${VAR}` / `${VAR:-default}` interpolation.
//!
//! - **Version**: 3.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 3.0.0: Backend sections (gemini, ollama, comfyui) and extension autoload list
//! - 2.0.0: YAML configuration with environment interpolation
//! - 1.0.0: Initial environment variable configuration

use crate::backend::comfyui::{self, WorkflowParams};
use crate::backend::{gemini, ollama};
use crate::extensions::ExtensionName;
use crate::personas::{PersonaRegistry, DEFAULT_PERSONA_KEY};
use anyhow::{Context, Result};
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub discord_token: String,

    /// Dev mode guild ID (for faster command registration)
    #[serde(default)]
    pub discord_guild_id: Option<String>,

    /// User allowed to run load/unload/reload; falls back to the application owner
    #[serde(default)]
    pub owner_id: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Extensions loaded at startup
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    #[serde(default = "default_persona")]
    pub default_persona: String,

    /// Extra personas, or replacements for built-in ones
    #[serde(default)]
    pub personas: HashMap<String, String>,

    #[serde(default)]
    pub gemini: GeminiSettings,

    #[serde(default)]
    pub ollama: OllamaSettings,

    #[serde(default)]
    pub comfyui: ComfyUiSettings,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_cache_ttl")]
    pub capability_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeminiSettings {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_gemini_base_url")]
    pub base_url: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaSettings {
    #[serde(default = "default_ollama_base_url")]
    pub base_url: String,
    #[serde(default = "default_ollama_model")]
    pub default_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComfyUiSettings {
    #[serde(default = "default_comfyui_address")]
    pub server_address: String,
    #[serde(default)]
    pub workflow: WorkflowParams,
}

// Default value functions for serde
fn default_log_level() -> String {
    "info".to_string()
}

fn default_extensions() -> Vec<String> {
    vec![
        ExtensionName::ChatOllama.as_str().to_string(),
        ExtensionName::ImageGen.as_str().to_string(),
    ]
}

fn default_persona() -> String {
    DEFAULT_PERSONA_KEY.to_string()
}

fn default_request_timeout() -> u64 {
    120
}

fn default_cache_ttl() -> u64 {
    30
}

fn default_gemini_base_url() -> String {
    gemini::DEFAULT_BASE_URL.to_string()
}

fn default_gemini_model() -> String {
    gemini::DEFAULT_MODEL.to_string()
}

fn default_ollama_base_url() -> String {
    ollama::DEFAULT_BASE_URL.to_string()
}

fn default_ollama_model() -> String {
    ollama::DEFAULT_MODEL.to_string()
}

fn default_comfyui_address() -> String {
    comfyui::DEFAULT_SERVER_ADDRESS.to_string()
}

impl Default for GeminiSettings {
    fn default() -> Self {
        GeminiSettings {
            api_key: None,
            base_url: default_gemini_base_url(),
            model: default_gemini_model(),
        }
    }
}

impl Default for OllamaSettings {
    fn default() -> Self {
        OllamaSettings {
            base_url: default_ollama_base_url(),
            default_model: default_ollama_model(),
        }
    }
}

impl Default for ComfyUiSettings {
    fn default() -> Self {
        ComfyUiSettings {
            server_address: default_comfyui_address(),
            workflow: WorkflowParams::default(),
        }
    }
}

fn env_or(name: &str, default: impl FnOnce() -> String) -> String {
    env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or_else(default)
}

fn env_u64(name: &str, default: u64) -> Result<u64> {
    match env::var(name) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a whole number, got '{v}'")),
        _ => Ok(default),
    }
}

/// Splits a comma separated list, dropping blanks
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let config = Config {
            discord_token: env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN environment variable not set"))?,
            discord_guild_id: env::var("DISCORD_GUILD_ID").ok().filter(|v| !v.is_empty()),
            owner_id: env::var("OWNER_ID").ok().filter(|v| !v.is_empty()),
            log_level: env_or("LOG_LEVEL", default_log_level),
            extensions: env::var("EXTENSIONS")
                .map(|v| parse_list(&v))
                .unwrap_or_else(|_| default_extensions()),
            default_persona: env_or("DEFAULT_PERSONA", default_persona),
            personas: HashMap::new(),
            gemini: GeminiSettings {
                api_key: env::var("GEMINI_KEY").ok().filter(|v| !v.is_empty()),
                base_url: env_or("GEMINI_BASE_URL", default_gemini_base_url),
                model: env_or("GEMINI_MODEL", default_gemini_model),
            },
            ollama: OllamaSettings {
                base_url: env_or("OLLAMA_BASE_URL", default_ollama_base_url),
                default_model: env_or("OLLAMA_MODEL", default_ollama_model),
            },
            comfyui: ComfyUiSettings {
                server_address: env_or("COMFYUI_SERVER_ADDRESS", default_comfyui_address),
                workflow: WorkflowParams::default(),
            },
            request_timeout_secs: env_u64("REQUEST_TIMEOUT_SECS", default_request_timeout())?,
            capability_cache_ttl_secs: env_u64("CAPABILITY_CACHE_TTL_SECS", default_cache_ttl())?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable interpolation
    ///
    /// Supports `${VAR_NAME}` syntax for environment variable substitution.
    /// Example: `discord_token: "${DISCORD_TOKEN}"`
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::from_yaml(&content)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;

        info!(
            "Loaded config from {} with extensions [{}]",
            path.display(),
            config.extensions.join(", ")
        );

        Ok(config)
    }

    /// Parse and validate YAML text after interpolation
    pub fn from_yaml(content: &str) -> Result<Self> {
        let interpolated = interpolate_env_vars(content)?;
        let config: Config = serde_yaml::from_str(&interpolated).context("Failed to parse YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Auto-detect and load configuration
    ///
    /// Priority order:
    /// 1. If CONFIG_FILE env var is set, load from that file
    /// 2. If config.yaml exists in current directory, load from it
    /// 3. Fall back to environment variables
    pub fn auto_load() -> Result<Self> {
        if let Ok(config_path) = env::var("CONFIG_FILE") {
            info!("Loading config from CONFIG_FILE: {}", config_path);
            return Self::from_file(&config_path);
        }

        let default_config_path = "config.yaml";
        if Path::new(default_config_path).exists() {
            info!("Loading config from {}", default_config_path);
            return Self::from_file(default_config_path);
        }

        info!("No config file found, using environment variables");
        Self::from_env()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("discord_token is required");
        }

        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }

        self.owner()?;
        self.persona_registry()?;

        let mut chat_extensions = Vec::new();
        for name in &self.extensions {
            let Some(extension) = ExtensionName::parse(name) else {
                anyhow::bail!(
                    "Unknown extension '{}'. Use: {}",
                    name,
                    ExtensionName::all_names().join(", ")
                );
            };
            if extension.is_chat() {
                chat_extensions.push(extension.as_str());
            }
        }

        if chat_extensions.len() > 1 {
            anyhow::bail!(
                "Only one chat extension can be loaded at a time, got: {}",
                chat_extensions.join(", ")
            );
        }

        if chat_extensions.contains(&ExtensionName::ChatGemini.as_str()) && self.gemini_api_key().is_none() {
            anyhow::bail!("chat_gemini is enabled but GEMINI_KEY is not set");
        }

        Ok(())
    }

    /// Configured owner ID, if any
    pub fn owner(&self) -> Result<Option<u64>> {
        self.owner_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(|id| {
                id.trim()
                    .parse::<u64>()
                    .with_context(|| format!("owner_id must be a Discord user ID, got '{id}'"))
            })
            .transpose()
    }

    pub fn guild_id(&self) -> Option<u64> {
        self.discord_guild_id.as_ref().and_then(|id| id.parse::<u64>().ok())
    }

    pub fn gemini_api_key(&self) -> Option<&str> {
        self.gemini.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    pub fn persona_registry(&self) -> Result<PersonaRegistry> {
        PersonaRegistry::with_overrides(&self.personas, &self.default_persona)
            .map_err(|e| anyhow::anyhow!("Invalid default_persona: {e}"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn capability_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.capability_cache_ttl_secs)
    }
}

// ============================================================================
// Environment Variable Interpolation
// ============================================================================

/// Interpolate environment variables in a string
///
/// Supports `${VAR_NAME}` syntax. If a variable is not set, returns an error.
/// Use `${VAR_NAME:-default}` for default values.
fn interpolate_env_vars(content: &str) -> Result<String> {
    // Pattern: ${VAR_NAME} or ${VAR_NAME:-default}
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")?;

    let mut errors = Vec::new();
    let result = re.replace_all(content, |cap: &regex::Captures| {
        let var_name = &cap[1];
        match env::var(var_name) {
            Ok(v) => v,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                None => {
                    errors.push(format!("Environment variable '{}' is not set", var_name));
                    String::new()
                }
            },
        }
    });

    if !errors.is_empty() {
        anyhow::bail!("Missing environment variables:\n  - {}", errors.join("\n  - "));
    }

    Ok(result.into_owned())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn minimal() -> Config {
        Config::from_yaml("discord_token: \"token\"\n").unwrap()
    }

    #[test]
    fn test_interpolate_env_vars_simple() {
        env::set_var("RELAY_TEST_VAR_1", "value1");
        let input = "key: ${RELAY_TEST_VAR_1}";
        let result = interpolate_env_vars(input).unwrap();
        assert_eq!(result, "key: value1");
        env::remove_var("RELAY_TEST_VAR_1");
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        env::remove_var("RELAY_NONEXISTENT_VAR");
        let input = "key: ${RELAY_NONEXISTENT_VAR:-default_value}";
        let result = interpolate_env_vars(input).unwrap();
        assert_eq!(result, "key: default_value");
    }

    #[test]
    fn test_interpolate_env_vars_missing_no_default() {
        env::remove_var("RELAY_MISSING_VAR_FOR_TEST");
        let input = "key: ${RELAY_MISSING_VAR_FOR_TEST}";
        let result = interpolate_env_vars(input);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("RELAY_MISSING_VAR_FOR_TEST"));
    }

    #[test]
    fn test_defaults_from_minimal_yaml() {
        let config = minimal();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.extensions, vec!["chat_ollama", "image_gen"]);
        assert_eq!(config.default_persona, "maid");
        assert_eq!(config.ollama.base_url, "http://localhost:11434/api");
        assert_eq!(config.ollama.default_model, "gemma3:12b-it-qat");
        assert_eq!(config.comfyui.server_address, "127.0.0.1:8188");
        assert_eq!(config.comfyui.workflow.steps, 50);
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
        assert_eq!(config.capability_cache_ttl(), Duration::from_secs(30));
        assert_eq!(config.owner().unwrap(), None);
    }

    #[test]
    fn test_full_yaml() {
        env::set_var("RELAY_TEST_DISCORD_TOKEN", "test_token_123");
        env::set_var("RELAY_TEST_GEMINI_KEY", "gm-key");

        let yaml = r#"
discord_token: "${RELAY_TEST_DISCORD_TOKEN}"
owner_id: "1234567890"
log_level: "debug"
extensions: ["chat_gemini", "image_gen"]
default_persona: "pirate"
personas:
  pirate: "You are a pirate."
gemini:
  api_key: "${RELAY_TEST_GEMINI_KEY}"
comfyui:
  server_address: "gpu-box:8188"
  workflow:
    steps: 30
request_timeout_secs: 60
"#;

        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.discord_token, "test_token_123");
        assert_eq!(config.owner().unwrap(), Some(1234567890));
        assert_eq!(config.gemini_api_key(), Some("gm-key"));
        assert_eq!(config.gemini.model, "gemini-2.5-flash");
        assert_eq!(config.comfyui.workflow.steps, 30);
        assert_eq!(config.comfyui.workflow.width, 1024);
        assert_eq!(config.persona_registry().unwrap().default_key(), "pirate");

        env::remove_var("RELAY_TEST_DISCORD_TOKEN");
        env::remove_var("RELAY_TEST_GEMINI_KEY");
    }

    #[test]
    fn test_validation_empty_token() {
        let mut config = minimal();
        config.discord_token = "  ".to_string();
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("discord_token"));
    }

    #[test]
    fn test_validation_unknown_extension() {
        let mut config = minimal();
        config.extensions = vec!["chat_transformers".to_string()];
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("Unknown extension"));
    }

    #[test]
    fn test_validation_two_chat_extensions() {
        let mut config = minimal();
        config.gemini.api_key = Some("key".to_string());
        config.extensions = vec!["chat_gemini".to_string(), "chat_ollama".to_string()];
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("Only one chat extension"));
    }

    #[test]
    fn test_validation_gemini_without_key() {
        let mut config = minimal();
        config.extensions = vec!["chat_gemini".to_string()];
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("GEMINI_KEY"));
    }

    #[test]
    fn test_validation_unknown_default_persona() {
        let mut config = minimal();
        config.default_persona = "ghost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_zero_timeout() {
        let mut config = minimal();
        config.request_timeout_secs = 0;
        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("request_timeout_secs"));
    }

    #[test]
    fn test_validation_bad_owner_id() {
        let mut config = minimal();
        config.owner_id = Some("not-a-number".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" chat_ollama, ,image_gen "), vec!["chat_ollama", "image_gen"]);
        assert!(parse_list("").is_empty());
    }
}
