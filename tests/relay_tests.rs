//! Relay and controller behavior against scripted in-memory backends.

use async_trait::async_trait;
use persona_relay::backend::{
    BackendDescriptor, BackendKind, Capability, CapabilitySet, ChatBackend, ChatRequest, GeneratedImage,
    ImageBackend, SystemPromptStyle,
};
use persona_relay::controller::{Attachment, Command, InboundMessage, RelayController, ReplyBody};
use persona_relay::conversation::Role;
use persona_relay::extensions::{Extension, ExtensionFactory, ExtensionName, ExtensionRegistry};
use persona_relay::{ChatRelay, ImageRelay, PersonaRegistry, RelayError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct ScriptedBackend {
    descriptor: BackendDescriptor,
    style: SystemPromptStyle,
    capabilities: CapabilitySet,
    models: Vec<String>,
    delay: Duration,
    fail: AtomicBool,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    fn new(style: SystemPromptStyle, capabilities: CapabilitySet) -> Self {
        ScriptedBackend {
            descriptor: BackendDescriptor {
                name: "scripted".to_string(),
                endpoint: "memory://".to_string(),
                kind: BackendKind::LocalLlm,
            },
            style,
            capabilities,
            models: vec!["gemma3:12b-it-qat".to_string(), "qwen3:8b".to_string()],
            delay: Duration::ZERO,
            fail: AtomicBool::new(false),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_models(mut self, models: &[&str]) -> Self {
        self.models = models.iter().map(|m| m.to_string()).collect();
        self
    }

    fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    fn system_prompt_style(&self) -> SystemPromptStyle {
        self.style
    }

    fn default_model(&self) -> &str {
        "gemma3:12b-it-qat"
    }

    async fn fetch_capabilities(&self, _model: &str) -> Result<CapabilitySet> {
        Ok(self.capabilities)
    }

    async fn fetch_models(&self) -> Result<Vec<String>> {
        Ok(self.models.clone())
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(RelayError::Connection("connection refused".to_string()));
        }
        let last = request.messages.last().map(|m| m.joined_text()).unwrap_or_default();
        Ok(format!("reply to {last}"))
    }
}

struct StaticImage;

#[async_trait]
impl ImageBackend for StaticImage {
    fn descriptor(&self) -> &BackendDescriptor {
        static DESCRIPTOR: once_cell::sync::Lazy<BackendDescriptor> = once_cell::sync::Lazy::new(|| BackendDescriptor {
            name: "static".to_string(),
            endpoint: "memory://".to_string(),
            kind: BackendKind::LocalImageGen,
        });
        &DESCRIPTOR
    }

    async fn generate(&self, positive: &str, _negative: &str) -> Result<GeneratedImage> {
        Ok(GeneratedImage {
            filename: "ComfyUI_00001_.png".to_string(),
            bytes: positive.as_bytes().to_vec(),
        })
    }
}

struct ScriptedFactory {
    backend: Arc<ScriptedBackend>,
}

impl ExtensionFactory for ScriptedFactory {
    fn build(&self, name: ExtensionName) -> Result<Extension> {
        if name.is_chat() {
            Ok(Extension::Chat(Arc::new(relay(self.backend.clone()))))
        } else {
            Ok(Extension::Image(Arc::new(ImageRelay::new(
                Arc::new(StaticImage),
                Duration::from_secs(5),
            ))))
        }
    }
}

fn relay(backend: Arc<ScriptedBackend>) -> ChatRelay {
    ChatRelay::new(
        backend,
        Arc::new(PersonaRegistry::builtin()),
        Duration::from_secs(30),
        Duration::from_secs(5),
    )
}

async fn controller(backend: Arc<ScriptedBackend>, owner: Option<u64>) -> RelayController {
    let registry = ExtensionRegistry::new(Box::new(ScriptedFactory { backend }));
    registry.load("chat_ollama").await.unwrap();
    RelayController::new(Arc::new(registry), owner)
}

fn png() -> Attachment {
    Attachment {
        mime_type: "image/png".to_string(),
        bytes: vec![0x89, b'P', b'N', b'G'],
    }
}

#[tokio::test]
async fn test_turn_appends_exactly_two_messages() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let relay = relay(backend.clone());

    let before = relay.snapshot(1).await.history.len();
    relay.chat(1, "hello", None).await.unwrap();
    let after = relay.snapshot(1).await.history;

    assert_eq!(after.len(), before + 2);
    assert_eq!(after[after.len() - 2].role, Role::User);
    assert_eq!(after[after.len() - 1].role, Role::Assistant);
    assert_eq!(after[after.len() - 1].joined_text(), "reply to hello");
}

#[tokio::test]
async fn test_failed_turn_leaves_history_unchanged() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let relay = relay(backend.clone());
    relay.chat(1, "first", None).await.unwrap();
    let before = relay.snapshot(1).await;

    backend.fail.store(true, Ordering::SeqCst);
    let err = relay.chat(1, "second", None).await.unwrap_err();
    assert!(err.is_backend_failure());
    assert_eq!(relay.snapshot(1).await, before);
}

#[tokio::test]
async fn test_timed_out_turn_is_connection_error() {
    let backend = Arc::new(
        ScriptedBackend::new(SystemPromptStyle::Separate, CapabilitySet::empty()).with_delay(Duration::from_millis(300)),
    );
    let relay = ChatRelay::new(
        backend,
        Arc::new(PersonaRegistry::builtin()),
        Duration::from_secs(30),
        Duration::from_millis(20),
    );

    let err = relay.chat(1, "hello", None).await.unwrap_err();
    assert!(matches!(err, RelayError::Connection(_)));
    assert!(relay.snapshot(1).await.history.is_empty());
}

#[tokio::test]
async fn test_same_user_turns_are_serialized() {
    let backend = Arc::new(
        ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()).with_delay(Duration::from_millis(50)),
    );
    let relay = Arc::new(relay(backend.clone()));

    let first = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.chat(1, "first", None).await })
    };
    // Let the first turn take the user's lock
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.chat(1, "second", None).await })
    };
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let history = relay.snapshot(1).await.history;
    let texts: Vec<String> = history.iter().map(|m| m.joined_text()).collect();
    assert_eq!(history.len(), 1 + 4);
    assert_eq!(&texts[1..], &["first", "reply to first", "second", "reply to second"]);

    // The second request was composed after the first turn committed
    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].messages.len(), 4);
}

#[tokio::test]
async fn test_different_users_do_not_share_history() {
    let backend = Arc::new(
        ScriptedBackend::new(SystemPromptStyle::Separate, CapabilitySet::empty()).with_delay(Duration::from_millis(20)),
    );
    let relay = relay(backend);

    let (a, b) = tokio::join!(relay.chat(1, "from one", None), relay.chat(2, "from two", None));
    a.unwrap();
    b.unwrap();

    assert_eq!(relay.snapshot(1).await.history[0].joined_text(), "from one");
    assert_eq!(relay.snapshot(2).await.history[0].joined_text(), "from two");
}

#[tokio::test]
async fn test_mention_reply_card_uses_persona_title() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let controller = controller(backend.clone(), None).await;

    let reply = controller
        .handle_message(InboundMessage {
            author_id: 10,
            text: "hello".to_string(),
            attachments: vec![],
        })
        .await;

    assert_eq!(
        reply.body,
        ReplyBody::Card {
            title: "Maid".to_string(),
            body: "reply to hello".to_string()
        }
    );

    let request = &backend.requests()[0];
    assert_eq!(request.messages.len(), 2);
    assert_eq!(request.messages[0].role, Role::System);
    assert_eq!(
        request.messages[0].joined_text(),
        PersonaRegistry::builtin().get("maid").unwrap()
    );
}

#[tokio::test]
async fn test_image_dropped_for_text_only_model() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let controller = controller(backend.clone(), None).await;

    controller
        .handle_message(InboundMessage {
            author_id: 10,
            text: "what is this?".to_string(),
            attachments: vec![png()],
        })
        .await;

    let last = backend.requests()[0].messages.last().cloned().unwrap();
    assert_eq!(last.images().count(), 0);
    assert_eq!(last.joined_text(), "what is this?");
}

#[tokio::test]
async fn test_image_sent_to_vision_model() {
    let vision = CapabilitySet::empty().with(Capability::Vision);
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::Separate, vision));
    let controller = controller(backend.clone(), None).await;

    controller
        .handle_message(InboundMessage {
            author_id: 10,
            text: String::new(),
            attachments: vec![
                Attachment {
                    mime_type: "text/plain".to_string(),
                    bytes: b"notes".to_vec(),
                },
                png(),
            ],
        })
        .await;

    let last = backend.requests()[0].messages.last().cloned().unwrap();
    let images: Vec<(String, usize)> = last.images().map(|(m, d)| (m.to_string(), d.len())).collect();
    assert_eq!(images, vec![("image/png".to_string(), 4)]);
}

#[tokio::test]
async fn test_empty_mention_asks_for_input() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let controller = controller(backend.clone(), None).await;

    let reply = controller
        .handle_message(InboundMessage {
            author_id: 10,
            text: "  ".to_string(),
            attachments: vec![],
        })
        .await;

    assert_eq!(reply.content(), RelayError::EmptyInput.user_message());
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_enable_thinking_on_unsupported_model() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let controller = controller(backend, None).await;

    let reply = controller.dispatch(10, Command::EnableThinking).await;
    assert!(reply.ephemeral);
    assert!(reply.content().contains("does not support thinking"));

    let reply = controller.dispatch(10, Command::DisableThinking).await;
    assert_eq!(reply.content(), "Thinking disabled.");
}

#[tokio::test]
async fn test_thinking_flag_reaches_request() {
    let thinking = CapabilitySet::empty().with(Capability::Thinking);
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, thinking));
    let relay = relay(backend.clone());

    relay.chat(1, "a", None).await.unwrap();
    relay.enable_thinking(1).await.unwrap();
    relay.chat(1, "b", None).await.unwrap();

    let requests = backend.requests();
    assert_eq!(requests[0].think, Some(false));
    assert_eq!(requests[1].think, Some(true));
}

#[tokio::test]
async fn test_select_persona_commands() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let controller = controller(backend, None).await;

    let reply = controller.dispatch(10, Command::SelectPersona("pirate".to_string())).await;
    assert!(reply.content().contains("catgirl, crush, maid, mesugaki, robot"));

    controller.dispatch(10, Command::SelectPersona("robot".to_string())).await;
    let reply = controller
        .handle_message(InboundMessage {
            author_id: 10,
            text: "status".to_string(),
            attachments: vec![],
        })
        .await;
    assert!(matches!(reply.body, ReplyBody::Card { ref title, .. } if title == "Robot"));
}

#[tokio::test]
async fn test_select_model_validation() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let controller = controller(backend, None).await;

    let reply = controller.dispatch(10, Command::SelectModel(Some("llama9".to_string()))).await;
    assert!(reply.content().contains("`llama9` is not installed"));
    assert!(reply.content().contains("qwen3:8b"));

    let reply = controller.dispatch(10, Command::SelectModel(Some("qwen3:8b".to_string()))).await;
    assert_eq!(reply.content(), "Model set to `qwen3:8b`. Conversation history cleared.");

    let reply = controller.dispatch(10, Command::SelectModel(None)).await;
    assert!(reply.content().contains("- `qwen3:8b` (selected)"));
}

#[tokio::test]
async fn test_select_model_with_no_models() {
    let backend = Arc::new(
        ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()).with_models(&[]),
    );
    let controller = controller(backend, None).await;

    let reply = controller.dispatch(10, Command::SelectModel(Some("qwen3:8b".to_string()))).await;
    assert_eq!(reply.content(), RelayError::NoModelsAvailable.user_message());
}

#[tokio::test]
async fn test_admin_commands_require_owner() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let controller = controller(backend, Some(1)).await;

    let reply = controller.dispatch(2, Command::Load("image_gen".to_string())).await;
    assert_eq!(
        reply.body,
        ReplyBody::Card {
            title: "Access Denied".to_string(),
            body: "You don't have permission for it.".to_string()
        }
    );
    assert!(!controller.extensions().is_loaded(ExtensionName::ImageGen).await);

    let reply = controller.dispatch(2, Command::Unload("chat_ollama".to_string())).await;
    assert!(matches!(reply.body, ReplyBody::Card { .. }));
    assert!(controller.extensions().is_loaded(ExtensionName::ChatOllama).await);

    let reply = controller.dispatch(1, Command::Load("image_gen".to_string())).await;
    assert!(reply.content().contains("SUCCESS"));
    assert!(controller.extensions().is_loaded(ExtensionName::ImageGen).await);
}

#[tokio::test]
async fn test_owner_unknown_denies_everyone() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let controller = controller(backend, None).await;

    let reply = controller.dispatch(1, Command::Reload("chat_ollama".to_string())).await;
    assert!(matches!(reply.body, ReplyBody::Card { ref title, .. } if title == "Access Denied"));

    controller.set_owner_if_unset(1);
    controller.set_owner_if_unset(2);
    assert_eq!(controller.owner(), Some(1));
}

#[tokio::test]
async fn test_chat_extension_conflict_and_unload() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let controller = controller(backend, Some(1)).await;

    let reply = controller.dispatch(1, Command::Load("chat_gemini".to_string())).await;
    assert!(reply.content().contains("Unload `chat_ollama` first"));

    controller.dispatch(1, Command::Unload("chat_ollama".to_string())).await;
    let reply = controller.dispatch(10, Command::Reset).await;
    assert_eq!(reply.content(), RelayError::NoChatExtension.user_message());

    let reply = controller.dispatch(1, Command::Load("chat_gemini".to_string())).await;
    assert!(reply.content().contains("SUCCESS"));
}

#[tokio::test]
async fn test_reload_clears_conversations() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::Separate, CapabilitySet::empty()));
    let controller = controller(backend, Some(1)).await;

    controller
        .handle_message(InboundMessage {
            author_id: 10,
            text: "remember me".to_string(),
            attachments: vec![],
        })
        .await;
    assert_eq!(controller.extensions().chat().await.unwrap().snapshot(10).await.history.len(), 2);

    controller.dispatch(1, Command::Reload("chat_ollama".to_string())).await;
    assert!(controller.extensions().chat().await.unwrap().snapshot(10).await.history.is_empty());
}

#[tokio::test]
async fn test_generate_image_reply_is_spoiler() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let controller = controller(backend, Some(1)).await;

    let reply = controller
        .dispatch(
            10,
            Command::GenerateImage {
                positive: "1girl".to_string(),
                negative: None,
            },
        )
        .await;
    assert_eq!(reply.content(), RelayError::ImageGenUnavailable.user_message());

    controller.dispatch(1, Command::Load("image_gen".to_string())).await;
    let reply = controller
        .dispatch(
            10,
            Command::GenerateImage {
                positive: "1girl".to_string(),
                negative: None,
            },
        )
        .await;
    match reply.body {
        ReplyBody::Image { bytes, spoiler, .. } => {
            assert!(spoiler);
            assert_eq!(bytes, b"1girl");
        }
        other => panic!("expected image reply, got {other:?}"),
    }
}

#[tokio::test]
async fn test_autocomplete_sources() {
    let backend = Arc::new(ScriptedBackend::new(SystemPromptStyle::InHistory, CapabilitySet::empty()));
    let controller = controller(backend, None).await;

    assert_eq!(controller.autocomplete("select_persona", "ma").await, vec!["maid"]);
    assert_eq!(controller.autocomplete("select_model", "QWEN").await, vec!["qwen3:8b"]);
    assert_eq!(controller.autocomplete("load", "").await.len(), 3);
    assert!(controller.autocomplete("reset", "").await.is_empty());
}
