//! Image slash commands: /generate_image

use serenity::builder::CreateApplicationCommand;
use serenity::model::application::command::CommandOptionType;

/// Creates image commands
pub fn create_commands() -> Vec<CreateApplicationCommand> {
    vec![create_generate_image_command()]
}

/// Creates the generate_image command
fn create_generate_image_command() -> CreateApplicationCommand {
    CreateApplicationCommand::default()
        .name("generate_image")
        .description("Generate an image with ComfyUI")
        .create_option(|option| {
            option
                .name("positive_prompt")
                .description("What the image should contain")
                .kind(CommandOptionType::String)
                .required(true)
        })
        .create_option(|option| {
            option
                .name("negative_prompt")
                .description("What the image should not contain (optional)")
                .kind(CommandOptionType::String)
                .required(false)
        })
        .to_owned()
}
