// Discord commands for the economy system
//
// Same pattern as every other command file:
// 1. Extract primitive data from Discord types
// 2. Call core service
// 3. Format the response

use crate::core::economy::event_catalog::DAILY;
use crate::core::economy::{EconomyError, EconomyService, EventDefinition};
use crate::core::modules::ModuleService;
use crate::discord::hooks::EventHooks;
use crate::infra::economy::SqliteEconomyStore;
use crate::infra::modules::SqliteModuleStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Members are fetched from Discord in pages of this size (API maximum).
const MEMBER_PAGE_SIZE: u64 = 1000;

/// Shared state handed to every command and event handler.
pub struct Data {
    pub economy: Arc<EconomyService<SqliteEconomyStore>>,
    pub modules: Arc<ModuleService<SqliteModuleStore>>,
    pub hooks: Arc<EventHooks>,
    pub leaderboard_size: usize,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

pub(crate) fn guild_id(ctx: Context<'_>) -> Result<u64, Error> {
    Ok(ctx
        .guild_id()
        .ok_or("This command only works in servers")?
        .get())
}

/// Reply with a notice and return false when `command` is switched off here.
async fn ensure_enabled(ctx: Context<'_>, command: &str) -> Result<bool, Error> {
    let guild_id = guild_id(ctx)?;
    if ctx
        .data()
        .modules
        .is_command_enabled(guild_id, command)
        .await?
    {
        return Ok(true);
    }

    ctx.send(
        poise::CreateReply::default()
            .content(format!("`/{}` is disabled in this server.", command))
            .ephemeral(true),
    )
    .await?;
    Ok(false)
}

/// Claim your daily reward
#[poise::command(slash_command, guild_only)]
pub async fn daily(ctx: Context<'_>) -> Result<(), Error> {
    if !ensure_enabled(ctx, "daily").await? {
        return Ok(());
    }

    let user = ctx.author();
    if user.bot {
        ctx.say("Bots don't need points! 🤖").await?;
        return Ok(());
    }
    let guild_id = guild_id(ctx)?;

    match ctx
        .data()
        .economy
        .award_event(guild_id, user.id.get(), DAILY)
        .await
    {
        Ok(receipt) => {
            let embed = serenity::CreateEmbed::new()
                .title("✅ Daily Reward Claimed!")
                .description(format!(
                    "You received **{} points**!",
                    format_number(receipt.points_awarded)
                ))
                .color(0x00FF00) // Green
                .field(
                    "New Total",
                    format!("**{}** points", format_number(receipt.new_total)),
                    true,
                );
            ctx.send(poise::CreateReply::default().embed(embed)).await?;
        }
        Err(EconomyError::OccurrenceLimitReached { .. }) => {
            let embed = serenity::CreateEmbed::new()
                .title("⏰ Daily Reward Already Claimed")
                .description("You have already claimed your daily reward.")
                .color(0xFFA500); // Orange
            ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
                .await?;
        }
        Err(e) => reply_award_error(ctx, &e).await?,
    }

    Ok(())
}

/// Check your points (or someone else's)
#[poise::command(slash_command, guild_only)]
pub async fn points(
    ctx: Context<'_>,
    #[description = "User to check (defaults to you)"] user: Option<serenity::User>,
) -> Result<(), Error> {
    if !ensure_enabled(ctx, "points").await? {
        return Ok(());
    }

    let target_user = user.as_ref().unwrap_or_else(|| ctx.author());
    if target_user.bot {
        ctx.say("Bots don't earn points! 🤖").await?;
        return Ok(());
    }
    let guild_id = guild_id(ctx)?;

    let total = ctx
        .data()
        .economy
        .get_user_total(guild_id, target_user.id.get())
        .await?;

    let embed = serenity::CreateEmbed::new()
        .title(format!("🏅 {}'s Points", target_user.name))
        .color(0xFFD700) // Gold
        .thumbnail(target_user.face())
        .field("Total", format!("**{}** points", format_number(total)), true)
        .footer(serenity::CreateEmbedFooter::new(
            "Use /daily to claim your daily reward!",
        ));

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Show the top server members by points
#[poise::command(slash_command, guild_only)]
pub async fn leaderboard(ctx: Context<'_>) -> Result<(), Error> {
    if !ensure_enabled(ctx, "leaderboard").await? {
        return Ok(());
    }

    let guild_id = guild_id(ctx)?;
    let size = ctx.data().leaderboard_size;
    let top = ctx.data().economy.get_top_users(guild_id, size).await?;

    if top.is_empty() {
        ctx.say("No leaderboard data found! Claim `/daily` to get started.")
            .await?;
        return Ok(());
    }

    let description = top
        .iter()
        .enumerate()
        .map(|(index, row)| {
            format!(
                "**{}.** <@{}> - {} points",
                index + 1,
                row.user_id,
                format_number(row.points)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let embed = serenity::CreateEmbed::new()
        .title(format!("🏆 Top {} Leaderboard", size))
        .description(description)
        .color(0x00FF00);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// List every event that can award points
#[poise::command(slash_command, guild_only)]
pub async fn events(ctx: Context<'_>) -> Result<(), Error> {
    if !ensure_enabled(ctx, "events").await? {
        return Ok(());
    }

    let guild_id = guild_id(ctx)?;
    let user_id = ctx.author().id.get();
    let economy = &ctx.data().economy;

    let definitions = economy.list_events().await?;
    let mut lines = Vec::with_capacity(definitions.len());
    for definition in &definitions {
        let claimed = economy
            .get_occurrences(guild_id, user_id, &definition.key)
            .await?;
        lines.push(describe_event(definition, claimed));
    }
    let description = if lines.is_empty() {
        "No events are defined yet.".to_string()
    } else {
        lines.join("\n")
    };

    let embed = serenity::CreateEmbed::new()
        .title("📋 Point Events")
        .description(description)
        .color(0x5865F2);

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Give an event-based reward to a user
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn give(
    ctx: Context<'_>,
    #[description = "Select a user to reward"] user: serenity::User,
    #[description = "Which event key to award? (e.g. SUBMIT_DEPOSIT, BOOST_SERVER)"] event: String,
) -> Result<(), Error> {
    if !ensure_enabled(ctx, "give").await? {
        return Ok(());
    }

    if user.bot {
        ctx.say("You can't give points to bots!").await?;
        return Ok(());
    }
    let guild_id = guild_id(ctx)?;
    let event_key = normalize_event_key(&event);

    match ctx
        .data()
        .economy
        .award_event(guild_id, user.id.get(), &event_key)
        .await
    {
        Ok(receipt) => {
            let embed = serenity::CreateEmbed::new()
                .title("Event Awarded")
                .description(format!(
                    "Gave event [{}] to <@{}>.\nThey now have **{} points**.",
                    receipt.event_key,
                    user.id,
                    format_number(receipt.new_total)
                ))
                .color(0x00FF00);
            ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
                .await?;
        }
        Err(e) => reply_award_error(ctx, &e).await?,
    }

    Ok(())
}

/// Give an event-based reward to everyone in the server
#[poise::command(slash_command, guild_only, required_permissions = "ADMINISTRATOR")]
pub async fn giveall(
    ctx: Context<'_>,
    #[description = "Which event key to award?"] event: String,
) -> Result<(), Error> {
    if !ensure_enabled(ctx, "giveall").await? {
        return Ok(());
    }

    let guild_id = ctx.guild_id().ok_or("This command only works in servers")?;
    let event_key = normalize_event_key(&event);

    // Reject unknown keys before paging through the member list
    if let Err(e) = ctx.data().economy.lookup(&event_key).await {
        reply_award_error(ctx, &e).await?;
        return Ok(());
    }

    // Fetching members and awarding can take a while on large servers
    ctx.defer_ephemeral().await?;

    let user_ids = match fetch_human_member_ids(ctx, guild_id).await {
        Ok(ids) => ids,
        Err(e) => {
            tracing::error!(guild_id = guild_id.get(), "Could not fetch guild members: {}", e);
            ctx.say("Could not fetch guild members. Try again later?")
                .await?;
            return Ok(());
        }
    };

    let summary = ctx
        .data()
        .economy
        .award_event_to_all(guild_id.get(), &event_key, &user_ids)
        .await;

    let embed = serenity::CreateEmbed::new()
        .title("Mass Award Complete")
        .description(format!(
            "Event [{}] awarded to **{}** of {} members.",
            event_key,
            format_number(summary.awarded as u64),
            format_number(summary.attempted as u64)
        ))
        .field(
            "Already claimed",
            format_number(summary.already_claimed as u64),
            true,
        )
        .field("Failed", format_number(summary.failed as u64), true)
        .color(if summary.failed == 0 { 0x00FF00 } else { 0xFFA500 });

    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// Page through the whole member list, leaving bots out.
async fn fetch_human_member_ids(
    ctx: Context<'_>,
    guild_id: serenity::GuildId,
) -> Result<Vec<u64>, Error> {
    let mut user_ids = Vec::new();
    let mut after: Option<serenity::UserId> = None;

    loop {
        let page = guild_id
            .members(ctx.http(), Some(MEMBER_PAGE_SIZE), after)
            .await?;
        let page_len = page.len() as u64;
        after = page.last().map(|member| member.user.id);

        user_ids.extend(
            page.iter()
                .filter(|member| !member.user.bot)
                .map(|member| member.user.id.get()),
        );

        if page_len < MEMBER_PAGE_SIZE {
            break;
        }
    }

    Ok(user_ids)
}

async fn reply_award_error(ctx: Context<'_>, err: &EconomyError) -> Result<(), Error> {
    if let EconomyError::StoreFailure(detail) = err {
        tracing::error!(command = %ctx.command().name, "Economy store failure: {}", detail);
    }

    let embed = serenity::CreateEmbed::new()
        .title("Failed to Award Event")
        .description(award_error_message(err))
        .color(0xFF0000);
    ctx.send(poise::CreateReply::default().embed(embed).ephemeral(true))
        .await?;
    Ok(())
}

/// User-facing text for an economy error. Store details never leak out.
fn award_error_message(err: &EconomyError) -> String {
    match err {
        EconomyError::UnknownEvent(key) => format!(
            "Unknown event key [{}]. Use `/events` to see what can be awarded.",
            key
        ),
        EconomyError::OccurrenceLimitReached {
            event_key,
            max_occurrence,
        } => format!(
            "Event [{}] has already been awarded the maximum number of times ({}).",
            event_key, max_occurrence
        ),
        EconomyError::InvalidLimit => err.to_string(),
        EconomyError::StoreFailure(_) => {
            "Something went wrong while saving points. Please try again later.".to_string()
        }
    }
}

fn normalize_event_key(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// One `/events` line; `claimed` is how often the caller already earned it.
fn describe_event(definition: &EventDefinition, claimed: u64) -> String {
    let progress = match definition.max_occurrence {
        0 => format!("unlimited, earned {}x", claimed),
        max if definition.limit_reached(claimed) => format!("{}/{} ✅", claimed, max),
        max => format!("{}/{}", claimed, max),
    };
    format!(
        "`{}` {}: **{}** points ({})",
        definition.key,
        definition.name,
        format_number(definition.points),
        progress
    )
}

/// Format a number with commas for readability
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.insert(0, ',');
        }
        result.insert(0, c);
    }
    result
}
