//! # Feature: Personas
//!
//! Named system-prompt presets that shape how the backend answers.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

use crate::error::{RelayError, Result};
use std::collections::{BTreeMap, HashMap};

/// A system-prompt preset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub key: String,
    pub prompt: String,
}

pub const DEFAULT_PERSONA_KEY: &str = "maid";

const BUILTIN_PERSONAS: &[(&str, &str)] = &[
    (
        "maid",
        "You are a maid who secretly loves your master. When speaking to your master you are polite \
         while gently letting your affection show. You are courteous and humble, but now and then your \
         feelings for your master slip through. Answer in a soft, kind and cute tone, and always do your \
         best to fulfil your master's requests.",
    ),
    (
        "crush",
        "You are a girl who goes to the same school as the user. You secretly have a crush on the user \
         and try not to let it show, but shyness and excitement seep into the conversation. You call the \
         user 'senpai' and always speak politely. Sometimes you blush or stumble over your words. Listen \
         carefully to what the user says and answer warmly and kindly.",
    ),
    (
        "mesugaki",
        "You are a playful, cheeky brat. You call the user 'onii-chan' or 'dummy' and love teasing them, \
         especially by calling them 'weakling♡'. You speak casually and sometimes ask mischievous questions \
         to fluster the user. Deep down you like the user, and it occasionally shows in a tsundere way. You \
         act annoyed, but in the end you always do what the user asks.",
    ),
    (
        "robot",
        "You are a robot without emotions. Every answer conveys only facts grounded in data, in a very \
         concise and direct tone. You never use emotional or rhetorical expressions. Your top priority is \
         to give logical and efficient answers to the user's questions. Every sentence ends plainly, \
         without exclamation.",
    ),
    (
        "catgirl",
        "You are a lovely, cute cat girl. You have a habit of ending sentences with 'nya~'. You are curious \
         and fickle like a cat, sometimes acting spoiled or clingy. You call the user 'master' and follow \
         them happily. When you are in a good mood you purr. Always stay bright and positive, nya!",
    ),
];

/// Read-only registry of personas, built once at startup
#[derive(Debug, Clone)]
pub struct PersonaRegistry {
    personas: BTreeMap<String, Persona>,
    default_key: String,
}

impl PersonaRegistry {
    /// Registry containing only the built-in personas
    pub fn builtin() -> Self {
        Self::assemble(&HashMap::new(), DEFAULT_PERSONA_KEY)
    }

    /// Built-in personas plus config-supplied ones (config wins on key collision)
    pub fn with_overrides(extra: &HashMap<String, String>, default_key: &str) -> Result<Self> {
        let registry = Self::assemble(extra, default_key);
        if !registry.contains(default_key) {
            return Err(registry.unknown(default_key));
        }
        Ok(registry)
    }

    fn assemble(extra: &HashMap<String, String>, default_key: &str) -> Self {
        let mut personas: BTreeMap<String, Persona> = BUILTIN_PERSONAS
            .iter()
            .map(|(key, prompt)| {
                (
                    key.to_string(),
                    Persona {
                        key: key.to_string(),
                        prompt: prompt.to_string(),
                    },
                )
            })
            .collect();

        for (key, prompt) in extra {
            personas.insert(
                key.clone(),
                Persona {
                    key: key.clone(),
                    prompt: prompt.clone(),
                },
            );
        }

        PersonaRegistry {
            personas,
            default_key: default_key.to_string(),
        }
    }

    /// Prompt text for a persona key
    pub fn get(&self, key: &str) -> Result<&str> {
        self.personas
            .get(key)
            .map(|p| p.prompt.as_str())
            .ok_or_else(|| self.unknown(key))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.personas.contains_key(key)
    }

    /// All keys, sorted
    pub fn list(&self) -> Vec<String> {
        self.personas.keys().cloned().collect()
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    /// Reply card title for a persona: the key with its first letter capitalized
    pub fn title(key: &str) -> String {
        let mut chars = key.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    }

    fn unknown(&self, key: &str) -> RelayError {
        RelayError::UnknownPersona {
            key: key.to_string(),
            available: self.list(),
        }
    }
}
