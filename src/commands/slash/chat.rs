//! Chat slash commands: /select_persona, /reset, /select_model, /enable_thinking, /disable_thinking

use serenity::builder::CreateApplicationCommand;
use serenity::model::application::command::CommandOptionType;

/// Creates chat commands
pub fn create_commands() -> Vec<CreateApplicationCommand> {
    vec![
        create_select_persona_command(),
        create_reset_command(),
        create_select_model_command(),
        create_enable_thinking_command(),
        create_disable_thinking_command(),
    ]
}

/// Creates the select_persona command
fn create_select_persona_command() -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name("select_persona")
        .description("Choose a persona and clear your conversation history")
        .create_option(|option| {
            option
                .name("persona")
                .description("The persona to use")
                .kind(CommandOptionType::String)
                .required(true)
                .set_autocomplete(true)
        })
        .to_owned()
}

/// Creates the reset command
fn create_reset_command() -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name("reset")
        .description("Clear your conversation history")
        .to_owned()
}

/// Creates the select_model command; without a model it lists the installed ones
fn create_select_model_command() -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name("select_model")
        .description("Choose the model to chat with")
        .create_option(|option| {
            option
                .name("model")
                .description("Installed model name (leave empty to list them)")
                .kind(CommandOptionType::String)
                .required(false)
                .set_autocomplete(true)
        })
        .to_owned()
}

fn create_enable_thinking_command() -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name("enable_thinking")
        .description("Enable thinking mode for models that support it")
        .to_owned()
}

fn create_disable_thinking_command() -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name("disable_thinking")
        .description("Disable thinking mode")
        .to_owned()
}
