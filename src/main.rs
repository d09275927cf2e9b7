// This is the entry point of the economy bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (SQLite stores)
// - `discord/` = Discord-specific adapters (commands, gateway hooks)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands and event handlers

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

mod config;

use crate::config::BotConfig;
use crate::core::economy::{EconomyService, ECONOMY_COMMANDS};
use crate::core::modules::{ModuleKind, ModuleService};
use crate::discord::commands::presence;
use crate::discord::hooks::{self, EventHooks};
use crate::discord::{Data, Error};
use crate::infra::economy::SqliteEconomyStore;
use crate::infra::modules::SqliteModuleStore;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

/// Event handler for non-command Discord events.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    match event {
        serenity::FullEvent::GuildCreate { guild, .. } => {
            hooks::on_guild_available(data, guild.id).await;
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            hooks::on_member_join(data, new_member).await;
        }
        serenity::FullEvent::GuildMemberUpdate { event, .. } => {
            hooks::on_member_update(data, event).await;
        }
        serenity::FullEvent::Message { new_message } => {
            hooks::on_message(data, new_message).await;
        }
        _ => {}
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = BotConfig::from_env()?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // Create our services with their dependencies.
    // This is the "composition root" where we wire everything together.

    let pool = infra::database::connect(
        &config.database_url,
        config.sqlite_max_connections,
        config.sqlite_busy_timeout,
    )
    .await
    .with_context(|| format!("Failed to open economy database at {}", config.database_url))?;

    let economy_store = SqliteEconomyStore::new(pool.clone());
    economy_store
        .migrate()
        .await
        .context("Failed to migrate economy tables")?;

    let module_store = SqliteModuleStore::new(pool);
    module_store
        .migrate()
        .await
        .context("Failed to migrate module tables")?;

    let economy_service = Arc::new(
        EconomyService::new(economy_store).with_fanout_concurrency(config.fanout_concurrency),
    );
    // Seed once up front too, so the catalog cache is warm before any guild loads
    economy_service
        .seed_defaults()
        .await
        .context("Failed to seed economy events")?;

    let module_service = Arc::new(ModuleService::new(
        module_store,
        ModuleKind::Economy,
        ECONOMY_COMMANDS,
    ));

    // Create the data structure that will be shared across all commands
    let data = Data {
        economy: Arc::clone(&economy_service),
        modules: Arc::clone(&module_service),
        hooks: Arc::new(EventHooks::new()),
        leaderboard_size: config.leaderboard_size,
    };

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS // Joins, boosts and /giveall member lists
        | serenity::GatewayIntents::GUILD_MESSAGES;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![
                discord::commands::economy::daily(),
                discord::commands::economy::points(),
                discord::commands::economy::leaderboard(),
                discord::commands::economy::events(),
                discord::commands::economy::give(),
                discord::commands::economy::giveall(),
                discord::commands::economy_admin::economy(),
            ],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(|ctx, _ready, framework| {
            Box::pin(async move {
                tracing::info!("Bot is starting up...");

                poise::builtins::register_globally(ctx, &framework.options().commands).await?;

                tracing::info!("Commands registered, bot is ready");
                presence::on_ready(ctx);

                Ok(data)
            })
        })
        .build();

    let mut client = serenity::ClientBuilder::new(&config.discord_token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    client.start().await.context("Error running bot")?;
    Ok(())
}
