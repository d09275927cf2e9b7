// Admin commands for the economy module: lifecycle, reconcile and per-command toggles

use crate::core::economy::{load_for_guild, ECONOMY_COMMANDS};
use crate::core::modules::ModuleError;
use crate::discord::commands::economy::{format_number, guild_id};
use crate::discord::{Context, Error};
use poise::serenity_prelude as serenity;

/// Manage the economy module for this server.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    subcommands("status", "enable", "disable", "reconcile", "toggle_command")
)]
pub async fn economy(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Show whether the economy module and its commands are enabled.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let state = ctx.data().modules.get_state(guild_id).await?;

    let (status, commands) = match state {
        Some(state) => {
            let status = if state.enabled { "Enabled" } else { "Disabled" };
            let commands = state
                .commands
                .iter()
                .map(|(name, enabled)| {
                    format!("{} `/{}`", if enabled { "✅" } else { "🚫" }, name)
                })
                .collect::<Vec<_>>()
                .join("\n");
            (status, commands)
        }
        None => ("Not loaded", "None".to_string()),
    };

    let embed = serenity::CreateEmbed::default()
        .title("Economy Module")
        .color(serenity::Color::BLURPLE)
        .field("Status", status, false)
        .field("Commands", commands, false)
        .footer(serenity::CreateEmbedFooter::new(format!(
            "Guild ID: {}",
            guild_id
        )))
        .timestamp(serenity::Timestamp::now());

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Enable the economy module.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn enable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;

    match ctx.data().modules.enable(guild_id).await {
        Ok(()) => ctx.say("✅ Economy module enabled.").await?,
        Err(ModuleError::AlreadyEnabled) => ctx.say("Module already enabled!").await?,
        Err(ModuleError::NotLoaded) => {
            // The guild showed up before the module was loaded; load it now.
            let data = ctx.data();
            load_for_guild(&*data.economy, &*data.modules, guild_id).await?;
            ctx.say("✅ Economy module loaded and enabled.").await?
        }
        Err(e) => return Err(e.into()),
    };
    Ok(())
}

/// Disable the economy module. Points and history are kept.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn disable(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;

    match ctx.data().modules.disable(guild_id).await {
        Ok(()) => ctx.say("🛑 Economy module disabled.").await?,
        Err(ModuleError::AlreadyDisabled) => ctx.say("Module already disabled!").await?,
        Err(ModuleError::NotLoaded) => {
            ctx.say("The economy module is not set up in this server.")
                .await?
        }
        Err(e) => return Err(e.into()),
    };
    Ok(())
}

/// Recompute every member's points from the event history.
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn reconcile(ctx: Context<'_>) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    ctx.defer_ephemeral().await?;

    let report = ctx.data().economy.reconcile_guild(guild_id).await?;

    let mut message = format!(
        "Checked **{}** members, corrected **{}** totals.",
        format_number(report.users as u64),
        format_number(report.corrected as u64)
    );
    if report.dangling_entries > 0 {
        message.push_str(&format!(
            "\n⚠️ {} history entries point at deleted events and count as 0 points.",
            format_number(report.dangling_entries)
        ));
    }

    ctx.say(message).await?;
    Ok(())
}

/// Turn a single economy command on or off.
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "ADMINISTRATOR",
    rename = "command"
)]
pub async fn toggle_command(
    ctx: Context<'_>,
    #[description = "Command name (e.g. giveall)"] name: String,
    #[description = "Should the command be available?"] enabled: bool,
) -> Result<(), Error> {
    let guild_id = guild_id(ctx)?;
    let name = name.trim().trim_start_matches('/').to_lowercase();

    match ctx
        .data()
        .modules
        .set_command_enabled(guild_id, &name, enabled)
        .await
    {
        Ok(()) => {
            let verb = if enabled { "enabled" } else { "disabled" };
            ctx.say(format!("`/{}` {}.", name, verb)).await?
        }
        Err(ModuleError::UnknownCommand(_)) => {
            ctx.say(format!(
                "Unknown command `{}`. Known commands: {}",
                name,
                ECONOMY_COMMANDS.join(", ")
            ))
            .await?
        }
        Err(ModuleError::NotLoaded) => {
            ctx.say("The economy module is not set up in this server.")
                .await?
        }
        Err(e) => return Err(e.into()),
    };
    Ok(())
}
