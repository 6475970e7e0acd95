//! Slash command definitions, registration and reply delivery

pub mod respond;
pub mod slash;

use anyhow::Result;
use log::info;
use serenity::builder::CreateApplicationCommand;
use serenity::model::application::command::Command;
use serenity::model::id::GuildId;
use serenity::prelude::Context;
use std::collections::HashMap;

/// Every slash command the bot answers
pub fn create_all_commands() -> Vec<CreateApplicationCommand> {
    let mut commands = slash::chat::create_commands();
    commands.extend(slash::image::create_commands());
    commands.extend(slash::admin::create_commands());
    commands
}

pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    let commands = create_all_commands();
    let count = commands.len();
    Command::set_global_application_commands(&ctx.http, |c| c.set_application_commands(commands)).await?;
    info!("Registered {count} global slash commands");
    Ok(())
}

pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    let commands = create_all_commands();
    let count = commands.len();
    guild_id
        .set_application_commands(&ctx.http, |c| c.set_application_commands(commands))
        .await?;
    info!("Registered {count} slash commands for guild {guild_id}");
    Ok(())
}

/// String values of the top-level options of an interaction
pub fn option_strings<'a, I>(options: I) -> HashMap<String, String>
where
    I: IntoIterator<Item = (&'a str, Option<&'a serde_json::Value>)>,
{
    options
        .into_iter()
        .filter_map(|(name, value)| {
            let value = value?;
            let text = match value.as_str() {
                Some(s) => s.to_string(),
                None => value.to_string(),
            };
            Some((name.to_string(), text))
        })
        .collect()
}
