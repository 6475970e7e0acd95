//! Delivers controller replies to Discord: channel messages for mentions,
//! interaction responses and followups for slash commands.
//!
//! Text longer than one Discord message is sent as consecutive pages; only
//! the first page of a card carries its title.

use crate::controller::{Reply, ReplyBody};
use serenity::builder::CreateEmbed;
use serenity::http::Http;
use serenity::model::application::interaction::application_command::ApplicationCommandInteraction;
use serenity::model::application::interaction::InteractionResponseType;
use serenity::model::channel::AttachmentType;
use serenity::model::id::ChannelId;
use std::borrow::Cow;

pub const MESSAGE_LIMIT: usize = 2000;
pub const EMBED_DESCRIPTION_LIMIT: usize = 4096;
pub const CARD_COLOR: u32 = 0xcceeff;

/// Cuts `text` to at most `max` characters, marking the cut with an ellipsis
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Splits `text` into chunks of at most `max` characters, breaking after the
/// last newline of a chunk when there is one. Always yields at least one chunk.
pub fn split_chars(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max || max == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let mut end = (start + max).min(chars.len());
        if end < chars.len() {
            if let Some(newline) = chars[start..end].iter().rposition(|&c| c == '\n') {
                if newline > 0 {
                    end = start + newline + 1;
                }
            }
        }
        chunks.push(chars[start..end].iter().collect());
        start = end;
    }
    chunks
}

/// Discord hides attachments whose filename starts with `SPOILER_`
pub fn attachment_filename(filename: &str, spoiler: bool) -> String {
    if spoiler && !filename.starts_with("SPOILER_") {
        format!("SPOILER_{filename}")
    } else {
        filename.to_string()
    }
}

fn attachment(filename: &str, bytes: &[u8], spoiler: bool) -> AttachmentType<'static> {
    AttachmentType::Bytes {
        data: Cow::Owned(bytes.to_vec()),
        filename: attachment_filename(filename, spoiler),
    }
}

/// One Discord message worth of a reply
#[derive(Debug, PartialEq, Eq)]
pub enum Page<'a> {
    Text(String),
    Card {
        title: Option<&'a str>,
        description: String,
    },
    Image {
        filename: &'a str,
        bytes: &'a [u8],
        spoiler: bool,
    },
}

pub fn pages(reply: &Reply) -> Vec<Page<'_>> {
    match &reply.body {
        ReplyBody::Text(text) => split_chars(text, MESSAGE_LIMIT)
            .into_iter()
            .map(Page::Text)
            .collect(),
        ReplyBody::Card { title, body } => split_chars(body, EMBED_DESCRIPTION_LIMIT)
            .into_iter()
            .enumerate()
            .map(|(i, description)| Page::Card {
                title: (i == 0).then_some(title.as_str()),
                description,
            })
            .collect(),
        ReplyBody::Image {
            filename,
            bytes,
            spoiler,
        } => vec![Page::Image {
            filename: filename.as_str(),
            bytes: bytes.as_slice(),
            spoiler: *spoiler,
        }],
    }
}

fn card<'e>(embed: &'e mut CreateEmbed, title: Option<&str>, description: &str) -> &'e mut CreateEmbed {
    if let Some(title) = title {
        embed.title(title);
    }
    embed.description(description).color(CARD_COLOR)
}

/// Sends a reply into a channel (mention-triggered chat)
pub async fn send_to_channel(http: &Http, channel_id: ChannelId, reply: &Reply) -> serenity::Result<()> {
    for page in pages(reply) {
        channel_id
            .send_message(http, |m| match &page {
                Page::Text(text) => m.content(text),
                Page::Card { title, description } => m.embed(|e| card(e, *title, description)),
                Page::Image {
                    filename,
                    bytes,
                    spoiler,
                } => m.add_file(attachment(filename, bytes, *spoiler)),
            })
            .await?;
    }
    Ok(())
}

/// Answers a slash command immediately with a single message
pub async fn respond(http: &Http, command: &ApplicationCommandInteraction, reply: &Reply) -> serenity::Result<()> {
    command
        .create_interaction_response(http, |response| {
            response
                .kind(InteractionResponseType::ChannelMessageWithSource)
                .interaction_response_data(|data| {
                    data.ephemeral(reply.ephemeral);
                    match &reply.body {
                        ReplyBody::Text(text) => data.content(truncate_chars(text, MESSAGE_LIMIT)),
                        ReplyBody::Card { title, body } => data.embed(|e| {
                            card(e, Some(title.as_str()), &truncate_chars(body, EMBED_DESCRIPTION_LIMIT))
                        }),
                        ReplyBody::Image {
                            filename,
                            bytes,
                            spoiler,
                        } => data.add_file(attachment(filename, bytes, *spoiler)),
                    }
                })
        })
        .await
}

/// Acknowledges a slow command; the reply follows via [`followup`]
pub async fn defer(http: &Http, command: &ApplicationCommandInteraction, ephemeral: bool) -> serenity::Result<()> {
    command
        .create_interaction_response(http, |response| {
            response
                .kind(InteractionResponseType::DeferredChannelMessageWithSource)
                .interaction_response_data(|data| data.ephemeral(ephemeral))
        })
        .await
}

pub async fn followup(http: &Http, command: &ApplicationCommandInteraction, reply: &Reply) -> serenity::Result<()> {
    for page in pages(reply) {
        command
            .create_followup_message(http, |message| {
                message.ephemeral(reply.ephemeral);
                match &page {
                    Page::Text(text) => message.content(text),
                    Page::Card { title, description } => message.embed(|e| card(e, *title, description)),
                    Page::Image {
                        filename,
                        bytes,
                        spoiler,
                    } => message.add_file(attachment(filename, bytes, *spoiler)),
                }
            })
            .await?;
    }
    Ok(())
}
