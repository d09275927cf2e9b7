// Wiring between the economy engine and its module lifecycle.

use super::economy_service::{EconomyError, EconomyService, EconomyStore, GuildId};
use crate::core::modules::{ModuleError, ModuleService, ModuleState, ModuleStore};
use thiserror::Error;

/// Slash commands owned by the economy module.
pub const ECONOMY_COMMANDS: &[&str] = &[
    "daily",
    "points",
    "leaderboard",
    "events",
    "give",
    "giveall",
];

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Unable to load economy module state: {0}")]
    Module(#[from] ModuleError),

    #[error("Failed to prepare the economy ledger: {0}")]
    Economy(#[from] EconomyError),
}

/// Bring the economy module up for a guild: lifecycle row first, then the
/// catalog, then the guild's totals are rebuilt from its event log so events
/// deleted since the last load stop counting. Called whenever a guild becomes
/// available; idempotent.
pub async fn load_for_guild<E: EconomyStore, M: ModuleStore>(
    economy: &EconomyService<E>,
    lifecycle: &ModuleService<M>,
    guild_id: GuildId,
) -> Result<ModuleState, LoadError> {
    let state = lifecycle.load(guild_id).await?;
    economy.seed_defaults().await?;
    economy.reconcile_guild(guild_id).await?;

    if state.enabled {
        tracing::debug!(guild_id, "Economy module loaded");
    } else {
        tracing::debug!(guild_id, "Economy module disabled, commands unreachable");
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::economy::event_catalog::{BOOST_SERVER, DAILY};
    use crate::core::modules::ModuleKind;
    use crate::infra::database;
    use crate::infra::economy::InMemoryEconomyStore;
    use crate::infra::modules::SqliteModuleStore;
    use std::time::Duration;

    async fn module_service(dir: &tempfile::TempDir) -> ModuleService<SqliteModuleStore> {
        let path = dir.path().join("modules.db");
        let pool = database::connect(path.to_str().unwrap(), 2, Duration::from_secs(5))
            .await
            .unwrap();
        let store = SqliteModuleStore::new(pool);
        store.migrate().await.unwrap();
        ModuleService::new(store, ModuleKind::Economy, ECONOMY_COMMANDS)
    }

    #[tokio::test]
    async fn test_load_enables_module_and_seeds_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let modules = module_service(&dir).await;
        let economy = EconomyService::new(InMemoryEconomyStore::new());

        let state = load_for_guild(&economy, &modules, 7).await.unwrap();

        assert!(state.enabled);
        assert!(modules.is_command_enabled(7, "giveall").await.unwrap());
        assert_eq!(economy.lookup(DAILY).await.unwrap().points, 85);
    }

    #[tokio::test]
    async fn test_load_drops_points_of_deleted_events() {
        let dir = tempfile::tempdir().unwrap();
        let modules = module_service(&dir).await;
        let economy = EconomyService::new(InMemoryEconomyStore::new());
        load_for_guild(&economy, &modules, 7).await.unwrap();

        economy.award_event(7, 1, DAILY).await.unwrap();
        economy.award_event(7, 1, BOOST_SERVER).await.unwrap();
        economy.store().delete_definition(BOOST_SERVER);
        assert_eq!(economy.get_user_total(7, 1).await.unwrap(), 3655);

        load_for_guild(&economy, &modules, 7).await.unwrap();
        assert_eq!(economy.get_user_total(7, 1).await.unwrap(), 85);
    }

    #[tokio::test]
    async fn test_reload_keeps_disabled_state() {
        let dir = tempfile::tempdir().unwrap();
        let modules = module_service(&dir).await;
        let economy = EconomyService::new(InMemoryEconomyStore::new());

        load_for_guild(&economy, &modules, 7).await.unwrap();
        modules.disable(7).await.unwrap();

        let state = load_for_guild(&economy, &modules, 7).await.unwrap();
        assert!(!state.enabled);
        assert!(!modules.status(7).await.unwrap());
    }
}
