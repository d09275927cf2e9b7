// Runtime configuration, read from the environment (and `.env` if present).

use anyhow::{bail, Context};
use std::str::FromStr;
use std::time::Duration;

use crate::core::economy::DEFAULT_FANOUT_CONCURRENCY;

const DEFAULT_DATABASE_URL: &str = "sqlite://data/economy.db";
const DEFAULT_LEADERBOARD_SIZE: usize = 10;
/// Discord caps embed descriptions, so keep the leaderboard short.
const MAX_LEADERBOARD_SIZE: usize = 25;

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub discord_token: String,
    pub database_url: String,
    pub sqlite_max_connections: u32,
    pub sqlite_busy_timeout: Duration,
    pub fanout_concurrency: usize,
    pub leaderboard_size: usize,
}

impl BotConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the config from any variable source. `from_env` passes the
    /// process environment; tests pass a map.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let discord_token = lookup("DISCORD_TOKEN").context(
            "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
        )?;

        let database_url =
            lookup("ECONOMY_DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let sqlite_max_connections = parse_or(&lookup, "ECONOMY_SQLITE_MAX_CONNECTIONS", 5u32)?;
        let busy_timeout_secs = parse_or(&lookup, "ECONOMY_SQLITE_BUSY_TIMEOUT_SECS", 5u64)?;
        let fanout_concurrency =
            parse_or(&lookup, "ECONOMY_FANOUT_CONCURRENCY", DEFAULT_FANOUT_CONCURRENCY)?;
        let leaderboard_size =
            parse_or(&lookup, "ECONOMY_LEADERBOARD_SIZE", DEFAULT_LEADERBOARD_SIZE)?;

        if sqlite_max_connections == 0 {
            bail!("ECONOMY_SQLITE_MAX_CONNECTIONS must be at least 1");
        }
        if fanout_concurrency == 0 {
            bail!("ECONOMY_FANOUT_CONCURRENCY must be at least 1");
        }
        if !(1..=MAX_LEADERBOARD_SIZE).contains(&leaderboard_size) {
            bail!("ECONOMY_LEADERBOARD_SIZE must be between 1 and {MAX_LEADERBOARD_SIZE}");
        }

        Ok(Self {
            discord_token,
            database_url,
            sqlite_max_connections,
            sqlite_busy_timeout: Duration::from_secs(busy_timeout_secs),
            fanout_concurrency,
            leaderboard_size,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid value for {name} ({raw:?}): {e}")),
    }
}
