// Gateway events that feed the award engine.
//
// These are the internal triggers: a member joining, a member starting to
// boost, and a member's first message. Each one is gated on the economy
// module being enabled for the guild, and an exhausted occurrence limit is
// the expected steady state, so it is ignored quietly.

use crate::core::economy::event_catalog::{BOOST_SERVER, FIRST_MESSAGE, JOIN_SERVER};
use crate::core::economy::{load_for_guild, EconomyError, EconomyService, EconomyStore};
use crate::core::modules::{ModuleService, ModuleStore};
use crate::discord::Data;
use dashmap::DashSet;
use poise::serenity_prelude as serenity;

/// How many (guild, user) pairs the first-message set holds before it starts over.
const MAX_TRACKED_FIRST_MESSAGES: usize = 100_000;

/// Process-local memory of who already triggered their first-message award,
/// so ordinary chat traffic doesn't hit the store on every message.
pub struct EventHooks {
    first_message_seen: DashSet<(u64, u64)>,
    capacity: usize,
}

impl Default for EventHooks {
    fn default() -> Self {
        Self::with_capacity(MAX_TRACKED_FIRST_MESSAGES)
    }
}

impl EventHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            first_message_seen: DashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// True only the first time (guild, user) is seen since the set was last
    /// cleared. A full set is cleared; members it forgets cost one store
    /// round trip that ends at the occurrence limit.
    pub fn mark_first_message(&self, guild_id: u64, user_id: u64) -> bool {
        if self.first_message_seen.len() >= self.capacity {
            self.first_message_seen.clear();
        }
        self.first_message_seen.insert((guild_id, user_id))
    }

    pub fn forget_first_message(&self, guild_id: u64, user_id: u64) {
        self.first_message_seen.remove(&(guild_id, user_id));
    }
}

/// A guild became available (startup or join): bring the module up.
pub async fn on_guild_available(data: &Data, guild_id: serenity::GuildId) {
    if let Err(e) = load_for_guild(&*data.economy, &*data.modules, guild_id.get()).await {
        tracing::error!(guild_id = guild_id.get(), "Failed to load economy module: {}", e);
    }
}

pub async fn on_member_join(data: &Data, member: &serenity::Member) {
    if member.user.bot {
        return;
    }
    award_from_hook(data, member.guild_id.get(), member.user.id.get(), JOIN_SERVER).await;
}

pub async fn on_member_update(data: &Data, event: &serenity::GuildMemberUpdateEvent) {
    if event.user.bot || event.premium_since.is_none() {
        return;
    }
    award_from_hook(data, event.guild_id.get(), event.user.id.get(), BOOST_SERVER).await;
}

pub async fn on_message(data: &Data, message: &serenity::Message) {
    if message.author.bot {
        return;
    }
    let Some(guild_id) = message.guild_id else {
        return;
    };

    award_first_message(
        &data.hooks,
        &*data.economy,
        &*data.modules,
        guild_id.get(),
        message.author.id.get(),
    )
    .await;
}

async fn award_first_message<E: EconomyStore, M: ModuleStore>(
    hooks: &EventHooks,
    economy: &EconomyService<E>,
    modules: &ModuleService<M>,
    guild_id: u64,
    user_id: u64,
) {
    // Mark only while enabled, otherwise re-enabling would skip these members.
    if !module_enabled(modules, guild_id).await || !hooks.mark_first_message(guild_id, user_id) {
        return;
    }
    if !award(economy, guild_id, user_id, FIRST_MESSAGE).await {
        // Unsettled: the member's next message tries again.
        hooks.forget_first_message(guild_id, user_id);
    }
}

async fn module_enabled<M: ModuleStore>(modules: &ModuleService<M>, guild_id: u64) -> bool {
    match modules.status(guild_id).await {
        Ok(enabled) => enabled,
        Err(e) => {
            tracing::error!(guild_id, "Failed to read economy module status: {}", e);
            false
        }
    }
}

async fn award_from_hook(data: &Data, guild_id: u64, user_id: u64, event_key: &str) {
    if module_enabled(&*data.modules, guild_id).await {
        award(&*data.economy, guild_id, user_id, event_key).await;
    }
}

/// True once the store has settled the award: recorded, or the limit was
/// already reached.
async fn award<E: EconomyStore>(
    economy: &EconomyService<E>,
    guild_id: u64,
    user_id: u64,
    event_key: &str,
) -> bool {
    match economy.award_event(guild_id, user_id, event_key).await {
        Ok(receipt) => {
            tracing::info!(
                guild_id,
                user_id,
                event_key,
                new_total = receipt.new_total,
                "Awarded event from gateway hook"
            );
            true
        }
        Err(EconomyError::OccurrenceLimitReached { .. }) => true,
        Err(e) => {
            tracing::warn!(guild_id, user_id, event_key, "Hook award failed: {}", e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::economy::ECONOMY_COMMANDS;
    use crate::core::modules::ModuleKind;
    use crate::infra::database;
    use crate::infra::economy::SqliteEconomyStore;
    use crate::infra::modules::SqliteModuleStore;
    use sqlx::SqlitePool;
    use std::time::Duration;

    struct Harness {
        pool: SqlitePool,
        economy: EconomyService<SqliteEconomyStore>,
        modules: ModuleService<SqliteModuleStore>,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hooks.db");
        let pool = database::connect(path.to_str().unwrap(), 2, Duration::from_secs(5))
            .await
            .unwrap();

        let economy_store = SqliteEconomyStore::new(pool.clone());
        economy_store.migrate().await.unwrap();
        let module_store = SqliteModuleStore::new(pool.clone());
        module_store.migrate().await.unwrap();

        let economy = EconomyService::new(economy_store);
        let modules = ModuleService::new(module_store, ModuleKind::Economy, ECONOMY_COMMANDS);
        load_for_guild(&economy, &modules, 1).await.unwrap();

        Harness {
            pool,
            economy,
            modules,
            _dir: dir,
        }
    }

    #[test]
    fn test_first_message_marked_once_per_guild() {
        let hooks = EventHooks::new();
        assert!(hooks.mark_first_message(1, 10));
        assert!(!hooks.mark_first_message(1, 10));
        assert!(hooks.mark_first_message(2, 10));
    }

    #[test]
    fn test_first_message_set_is_bounded() {
        let hooks = EventHooks::with_capacity(2);
        assert!(hooks.mark_first_message(1, 10));
        assert!(hooks.mark_first_message(1, 11));
        // Full: starts over, so earlier members are seen as new again.
        assert!(hooks.mark_first_message(1, 12));
        assert!(hooks.mark_first_message(1, 10));
        assert!(hooks.first_message_seen.len() <= 2);
    }

    #[tokio::test]
    async fn test_failed_first_message_award_is_retried() {
        let h = harness().await;
        let hooks = EventHooks::new();
        sqlx::query(
            "CREATE TRIGGER reject_points BEFORE INSERT ON user_points BEGIN SELECT RAISE(ABORT, 'disk full'); END",
        )
        .execute(&h.pool)
        .await
        .unwrap();

        award_first_message(&hooks, &h.economy, &h.modules, 1, 10).await;
        assert_eq!(h.economy.get_user_total(1, 10).await.unwrap(), 0);

        sqlx::query("DROP TRIGGER reject_points")
            .execute(&h.pool)
            .await
            .unwrap();

        award_first_message(&hooks, &h.economy, &h.modules, 1, 10).await;
        assert_eq!(h.economy.get_user_total(1, 10).await.unwrap(), 425);

        // Settled now: further messages are skipped.
        assert!(!hooks.mark_first_message(1, 10));
    }

    #[tokio::test]
    async fn test_disabled_module_does_not_mark_first_message() {
        let h = harness().await;
        let hooks = EventHooks::new();
        h.modules.disable(1).await.unwrap();

        award_first_message(&hooks, &h.economy, &h.modules, 1, 10).await;
        h.modules.enable(1).await.unwrap();
        award_first_message(&hooks, &h.economy, &h.modules, 1, 10).await;

        assert_eq!(h.economy.get_user_total(1, 10).await.unwrap(), 425);
    }
}
