pub mod manager_commands;
pub mod user_commands;

/// A way to group commands together.
///
/// Implementors of this trait can return a list of their commands within their own module.
/// Typically, you would group commands by their required permissions.
///
/// Additionally, the implementors of this trait should not directly "own" the commands.
/// You should simply generate them by running Poise's function and returning the result.
/// This way, you only need to `pub` the implementor and not the commands themselves.
pub trait CommandsContainer {
    type Data;
    type Error;

    fn get_all() -> Vec<poise::Command<Self::Data, Self::Error>>;
}

/// Checks shared by several commands.
pub mod checks {
    use poise::CreateReply;

    use crate::{database::ConfigDatabase, BotContext, BotError};

    /// Passes if the guild has picked its War and log channels.
    pub async fn is_config_set(ctx: BotContext<'_>) -> Result<bool, BotError> {
        let Some(guild_id) = ctx.guild_id() else {
            return Ok(false);
        };
        if ctx
            .data()
            .database
            .get_config(&guild_id.to_string())
            .await?
            .is_some()
        {
            return Ok(true);
        }

        ctx.send(
            CreateReply::default()
                .content("War is not set up in this server yet. Ask a manager to run /war_config first.")
                .ephemeral(true),
        )
        .await?;
        Ok(false)
    }
}
