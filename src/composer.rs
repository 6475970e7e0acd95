//! Builds backend requests from conversation state and new user input.
//!
//! The composer works on a copy of the history. The stored state is only
//! touched later, by the relay, once the backend reply is in hand.

use crate::backend::{CapabilitySet, ChatRequest, SystemPromptStyle};
use crate::conversation::{ConversationState, Message, Part, Role};
use crate::error::{RelayError, Result};
use crate::personas::PersonaRegistry;
use log::{debug, warn};

/// Image bytes attached to an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A request ready to send, plus the user turn to commit if it succeeds
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedTurn {
    pub request: ChatRequest,
    pub user_message: Message,
    pub image_dropped: bool,
}

pub fn compose(
    state: &ConversationState,
    personas: &PersonaRegistry,
    style: SystemPromptStyle,
    capabilities: &CapabilitySet,
    prompt: &str,
    image: Option<ImageInput>,
) -> Result<ComposedTurn> {
    let prompt = prompt.trim();
    if prompt.is_empty() && image.is_none() {
        return Err(RelayError::EmptyInput);
    }

    let persona_prompt = personas.get(&state.persona_key)?;

    let mut parts = Vec::with_capacity(2);
    if !prompt.is_empty() {
        parts.push(Part::Text(prompt.to_string()));
    }

    let mut image_dropped = false;
    if let Some(image) = image {
        if capabilities.vision {
            debug!("Attaching {} byte {} image", image.data.len(), image.mime_type);
            parts.push(Part::Image {
                mime_type: image.mime_type,
                data: image.data,
            });
        } else {
            warn!(
                "Model {} has no vision capability, dropping attached image",
                state.selected_model
            );
            image_dropped = true;
        }
    }

    // Image-only message on a text-only model: keep the turn well-formed
    if parts.is_empty() {
        parts.push(Part::Text(String::new()));
    }

    let user_message = Message {
        role: Role::User,
        parts,
    };

    let mut messages = state.history.clone();
    let system_instruction = match style {
        SystemPromptStyle::InHistory => {
            let has_system_head = messages
                .first()
                .map(|m| m.role == Role::System)
                .unwrap_or(false);
            if !has_system_head {
                messages.insert(0, Message::system(persona_prompt));
            }
            None
        }
        SystemPromptStyle::Separate => {
            messages.retain(|m| m.role != Role::System);
            Some(persona_prompt.to_string())
        }
    };
    messages.push(user_message.clone());

    let think = if capabilities.thinking {
        Some(state.thinking_enabled)
    } else {
        None
    };

    Ok(ComposedTurn {
        request: ChatRequest {
            model: state.selected_model.clone(),
            system_instruction,
            messages,
            think,
        },
        user_message,
        image_dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Capability;

    fn state(history: Vec<Message>) -> ConversationState {
        ConversationState {
            persona_key: "maid".into(),
            selected_model: "gemma3".into(),
            thinking_enabled: false,
            history,
        }
    }

    fn png() -> ImageInput {
        ImageInput {
            mime_type: "image/png".into(),
            data: vec![0x89, b'P', b'N', b'G'],
        }
    }

    #[test]
    fn test_empty_input_rejected() {
        let personas = PersonaRegistry::builtin();
        let err = compose(&state(vec![]), &personas, SystemPromptStyle::Separate, &CapabilitySet::empty(), "   ", None)
            .unwrap_err();
        assert_eq!(err, RelayError::EmptyInput);
    }

    #[test]
    fn test_image_only_is_accepted() {
        let personas = PersonaRegistry::builtin();
        let vision = CapabilitySet::empty().with(Capability::Vision);
        let turn = compose(&state(vec![]), &personas, SystemPromptStyle::Separate, &vision, "", Some(png())).unwrap();
        assert_eq!(turn.user_message.images().count(), 1);
    }

    #[test]
    fn test_image_dropped_without_vision() {
        let personas = PersonaRegistry::builtin();
        let turn = compose(
            &state(vec![]),
            &personas,
            SystemPromptStyle::Separate,
            &CapabilitySet::empty(),
            "what is this?",
            Some(png()),
        )
        .unwrap();

        assert!(turn.image_dropped);
        assert_eq!(turn.user_message.images().count(), 0);
        assert_eq!(turn.user_message.joined_text(), "what is this?");
    }

    #[test]
    fn test_image_embedded_with_vision() {
        let personas = PersonaRegistry::builtin();
        let vision = CapabilitySet::empty().with(Capability::Vision);
        let turn = compose(&state(vec![]), &personas, SystemPromptStyle::Separate, &vision, "what is this?", Some(png()))
            .unwrap();

        assert!(!turn.image_dropped);
        let last = turn.request.messages.last().unwrap();
        assert_eq!(last.parts.len(), 2);
        assert!(matches!(last.parts[0], Part::Text(_)));
        assert!(matches!(last.parts[1], Part::Image { .. }));
    }

    #[test]
    fn test_persona_in_history_not_duplicated() {
        let personas = PersonaRegistry::builtin();
        let maid = personas.get("maid").unwrap().to_string();
        let seeded = state(vec![Message::system(maid.clone())]);

        let turn = compose(&seeded, &personas, SystemPromptStyle::InHistory, &CapabilitySet::empty(), "hi", None).unwrap();
        let systems = turn.request.messages.iter().filter(|m| m.role == Role::System).count();
        assert_eq!(systems, 1);
        assert_eq!(turn.request.messages.len(), 2);
        assert_eq!(turn.request.system_instruction, None);

        // Missing head gets inserted
        let turn = compose(&state(vec![]), &personas, SystemPromptStyle::InHistory, &CapabilitySet::empty(), "hi", None).unwrap();
        assert_eq!(turn.request.messages[0], Message::system(maid));
    }

    #[test]
    fn test_persona_as_separate_field() {
        let personas = PersonaRegistry::builtin();
        let turn = compose(&state(vec![]), &personas, SystemPromptStyle::Separate, &CapabilitySet::empty(), "hi", None).unwrap();
        assert_eq!(turn.request.system_instruction.as_deref(), personas.get("maid").ok());
        assert!(turn.request.messages.iter().all(|m| m.role != Role::System));
    }

    #[test]
    fn test_think_field_only_with_capability() {
        let personas = PersonaRegistry::builtin();
        let mut s = state(vec![]);

        let turn = compose(&s, &personas, SystemPromptStyle::InHistory, &CapabilitySet::empty(), "hi", None).unwrap();
        assert_eq!(turn.request.think, None);

        let thinking = CapabilitySet::empty().with(Capability::Thinking);
        let turn = compose(&s, &personas, SystemPromptStyle::InHistory, &thinking, "hi", None).unwrap();
        assert_eq!(turn.request.think, Some(false));

        s.thinking_enabled = true;
        let turn = compose(&s, &personas, SystemPromptStyle::InHistory, &thinking, "hi", None).unwrap();
        assert_eq!(turn.request.think, Some(true));
    }

    #[test]
    fn test_stored_history_untouched() {
        let personas = PersonaRegistry::builtin();
        let s = state(vec![Message::user("a"), Message::assistant("b")]);
        let before = s.clone();
        let turn = compose(&s, &personas, SystemPromptStyle::Separate, &CapabilitySet::empty(), "c", None).unwrap();
        assert_eq!(s, before);
        assert_eq!(turn.request.messages.len(), 3);
    }
}
