//! Admin slash commands: /load, /unload, /reload
//!
//! Visible to everyone; the owner check happens when the command runs.

use serenity::builder::CreateApplicationCommand;
use serenity::model::application::command::CommandOptionType;

/// Creates admin commands
pub fn create_commands() -> Vec<CreateApplicationCommand> {
    vec![
        create_extension_command("load", "Load an extension (Owner)"),
        create_extension_command("unload", "Unload an extension (Owner)"),
        create_extension_command("reload", "Reload an extension with fresh state (Owner)"),
    ]
}

fn create_extension_command(name: &str, description: &str) -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name(name)
        .description(description)
        .create_option(|option| {
            option
                .name("extension")
                .description("Extension name")
                .kind(CommandOptionType::String)
                .required(true)
                .set_autocomplete(true)
        })
        .to_owned()
}
