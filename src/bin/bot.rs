//! Discord entry point: routes mentions and slash commands to the relay controller.

use anyhow::Result;
use dotenvy::dotenv;
use log::{debug, error, info, warn};
use once_cell::sync::OnceCell;
use serenity::async_trait;
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::application::interaction::autocomplete::AutocompleteInteraction;
use serenity::model::application::interaction::Interaction;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::id::GuildId;
use serenity::prelude::*;
use std::sync::Arc;

use persona_relay::commands::respond::{defer, followup, respond, send_to_channel};
use persona_relay::commands::{option_strings, register_global_commands, register_guild_commands};
use persona_relay::controller::{is_image_mime, strip_mention, Attachment};
use persona_relay::extensions::ConfiguredFactory;
use persona_relay::{Command, Config, ExtensionRegistry, InboundMessage, RelayController, Reply};

struct Handler {
    controller: Arc<RelayController>,
    guild_id: Option<GuildId>,
    bot_user_id: OnceCell<u64>,
}

impl Handler {
    fn new(controller: Arc<RelayController>, guild_id: Option<GuildId>) -> Self {
        Handler {
            controller,
            guild_id,
            bot_user_id: OnceCell::new(),
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }
        let Some(&bot_id) = self.bot_user_id.get() else {
            return;
        };
        if !msg.mentions_user_id(bot_id) {
            return;
        }

        let inbound = match self.inbound_message(&msg, bot_id).await {
            Ok(inbound) => inbound,
            Err(e) => {
                error!("Failed to read attachment from {}: {e}", msg.author.id);
                if let Err(why) = msg
                    .channel_id
                    .say(&ctx.http, "Sorry, I couldn't read that attachment.")
                    .await
                {
                    error!("Failed to send error message: {why}");
                }
                return;
            }
        };

        let _ = msg.channel_id.broadcast_typing(&ctx.http).await;
        let reply = self.controller.handle_message(inbound).await;

        if let Err(e) = send_to_channel(&ctx.http, msg.channel_id, &reply).await {
            error!("Failed to deliver reply to {}: {e}", msg.author.id);
            if let Err(why) = msg
                .channel_id
                .say(&ctx.http, "Sorry, I encountered an error sending my reply.")
                .await
            {
                error!("Failed to send error message: {why}");
            }
        }
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected and ready!", ready.user.name);
        info!("Connected to {} guilds", ready.guilds.len());
        let _ = self.bot_user_id.set(ready.user.id.0);

        if self.controller.owner().is_none() {
            match ctx.http.get_current_application_info().await {
                Ok(app) => self.controller.set_owner_if_unset(app.owner.id.0),
                Err(e) => warn!("Could not resolve application owner, admin commands disabled: {e}"),
            }
        }

        let registered = match self.guild_id {
            Some(guild_id) => {
                info!("Development mode: Registering commands for guild {guild_id}");
                register_guild_commands(&ctx, guild_id).await
            }
            None => {
                info!("Production mode: Registering commands globally");
                register_global_commands(&ctx).await
            }
        };
        if let Err(e) = registered {
            error!("Failed to register slash commands: {e}");
        }

        info!(
            "Loaded extensions: [{}]",
            self.controller.extensions().loaded_names().await.join(", ")
        );
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        match interaction {
            Interaction::ApplicationCommand(command) => {
                if let Err(e) = self.handle_slash_command(&ctx, &command).await {
                    error!("Error handling slash command '{}': {e}", command.data.name);
                    let _ = command
                        .edit_original_interaction_response(&ctx.http, |response| {
                            response.content("Sorry, I encountered an error processing your command.")
                        })
                        .await;
                }
            }
            Interaction::Autocomplete(autocomplete) => {
                if let Err(e) = self.handle_autocomplete(&ctx, &autocomplete).await {
                    debug!("Autocomplete for '{}' failed: {e}", autocomplete.data.name);
                }
            }
            _ => {}
        }
    }
}

impl Handler {
    /// Converts a mention into controller input, downloading the first image attachment only
    async fn inbound_message(&self, msg: &Message, bot_id: u64) -> serenity::Result<InboundMessage> {
        let mut attachments = Vec::new();
        let image = msg.attachments.iter().find(|a| {
            a.content_type
                .as_deref()
                .map(is_image_mime)
                .unwrap_or(false)
        });
        if let Some(image) = image {
            let bytes = image.download().await?;
            attachments.push(Attachment {
                mime_type: image.content_type.clone().unwrap_or_default(),
                bytes,
            });
        }

        Ok(InboundMessage {
            author_id: msg.author.id.0,
            text: strip_mention(&msg.content, bot_id),
            attachments,
        })
    }

    /// Every command is deferred first: a chat turn in flight holds the user's
    /// state, and commands for that user wait behind it.
    async fn handle_slash_command(
        &self,
        ctx: &Context,
        command: &ApplicationCommandInteraction,
    ) -> serenity::Result<()> {
        let options = option_strings(
            command
                .data
                .options
                .iter()
                .map(|o| (o.name.as_str(), o.value.as_ref())),
        );

        let Some(parsed) = Command::from_slash(&command.data.name, &options) else {
            return respond(&ctx.http, command, &Reply::text("Unknown command.").ephemeral()).await;
        };

        defer(&ctx.http, command, !parsed.is_public()).await?;
        let reply = self.controller.dispatch(command.user.id.0, parsed).await;
        followup(&ctx.http, command, &reply).await
    }

    async fn handle_autocomplete(
        &self,
        ctx: &Context,
        autocomplete: &AutocompleteInteraction,
    ) -> serenity::Result<()> {
        let partial = autocomplete
            .data
            .options
            .iter()
            .find(|opt| opt.focused)
            .and_then(|opt| opt.value.as_ref())
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let choices = self
            .controller
            .autocomplete(&autocomplete.data.name, partial)
            .await;

        autocomplete
            .create_autocomplete_response(&ctx.http, |response| {
                for choice in &choices {
                    response.add_string_choice(choice, choice);
                }
                response
            })
            .await
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv().ok();

    let config = Config::auto_load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(&config.log_level),
    )
    .init();

    info!("Starting persona relay...");

    let personas = Arc::new(config.persona_registry()?);
    info!("Personas: {}", personas.list().join(", "));

    let extensions = Arc::new(ExtensionRegistry::new(Box::new(ConfiguredFactory::new(
        config.clone(),
        personas,
    ))));
    for name in &config.extensions {
        extensions
            .load(name)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to load extension '{}': {}", name, e))?;
    }

    let controller = Arc::new(RelayController::new(extensions, config.owner()?));
    let guild_id = config.guild_id().map(GuildId);
    let handler = Handler::new(controller, guild_id);

    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::DIRECT_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await
        .map_err(|e| anyhow::anyhow!("Client creation failed: {}", e))?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
                shard_manager.lock().await.shutdown_all().await;
            }
            Err(e) => {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
        }
    });

    info!("Connecting to Discord gateway...");
    client
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("Gateway connection failed: {}", e))?;

    info!("Shut down cleanly");
    Ok(())
}
