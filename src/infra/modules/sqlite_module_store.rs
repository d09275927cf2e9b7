// SQLite-backed module lifecycle state.
//
// One row per (guild, module). Command flags are a typed map stored as JSON.
// Writes touch only the column they change: `enabled` through a conditional
// UPDATE, `command_flags` through a read-modify-write inside a transaction.

use crate::core::modules::{
    CommandFlags, CommandUpdate, ModuleError, ModuleKind, ModuleState, ModuleStore,
};
use async_trait::async_trait;
use sqlx::{Pool, Row, Sqlite};

fn store_error(e: impl std::fmt::Display) -> ModuleError {
    ModuleError::StoreFailure(e.to_string())
}

pub struct SqliteModuleStore {
    pool: Pool<Sqlite>,
}

impl SqliteModuleStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS module_state (
                guild_id INTEGER NOT NULL,
                module_name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                enabled BOOLEAN NOT NULL DEFAULT 0,
                command_flags TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY (guild_id, module_name)
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ModuleStore for SqliteModuleStore {
    async fn get_state(
        &self,
        guild_id: u64,
        module: ModuleKind,
    ) -> Result<Option<ModuleState>, ModuleError> {
        let row = sqlx::query(
            "SELECT enabled, command_flags FROM module_state WHERE guild_id = ? AND module_name = ?",
        )
        .bind(guild_id as i64)
        .bind(module.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let flags_json: String = row.get("command_flags");
        let commands: CommandFlags = serde_json::from_str(&flags_json).map_err(|e| {
            tracing::error!(guild_id, module = module.as_str(), "Corrupt command flags: {}", e);
            store_error(e)
        })?;

        Ok(Some(ModuleState {
            guild_id,
            module,
            enabled: row.get("enabled"),
            commands,
        }))
    }

    async fn insert_state(&self, state: &ModuleState) -> Result<bool, ModuleError> {
        let flags_json = serde_json::to_string(&state.commands).map_err(store_error)?;

        let result = sqlx::query(
            r#"
            INSERT INTO module_state (guild_id, module_name, description, enabled, command_flags)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(guild_id, module_name) DO NOTHING
            "#,
        )
        .bind(state.guild_id as i64)
        .bind(state.module.as_str())
        .bind(state.module.description())
        .bind(state.enabled)
        .bind(flags_json)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_enabled(
        &self,
        guild_id: u64,
        module: ModuleKind,
        enabled: bool,
    ) -> Result<bool, ModuleError> {
        let result = sqlx::query(
            r#"
            UPDATE module_state
            SET enabled = ?, updated_at = CURRENT_TIMESTAMP
            WHERE guild_id = ? AND module_name = ? AND enabled != ?
            "#,
        )
        .bind(enabled)
        .bind(guild_id as i64)
        .bind(module.as_str())
        .bind(enabled)
        .execute(&self.pool)
        .await
        .map_err(store_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_commands(
        &self,
        guild_id: u64,
        module: ModuleKind,
        update: CommandUpdate<'_>,
    ) -> Result<Option<bool>, ModuleError> {
        let mut tx = self.pool.begin().await.map_err(store_error)?;

        // Write first: the flags read below then happens under the write lock.
        let touched = sqlx::query(
            "UPDATE module_state SET updated_at = CURRENT_TIMESTAMP WHERE guild_id = ? AND module_name = ?",
        )
        .bind(guild_id as i64)
        .bind(module.as_str())
        .execute(&mut *tx)
        .await
        .map_err(store_error)?;
        if touched.rows_affected() == 0 {
            tx.rollback().await.map_err(store_error)?;
            return Ok(None);
        }

        let flags_json: String = sqlx::query_scalar(
            "SELECT command_flags FROM module_state WHERE guild_id = ? AND module_name = ?",
        )
        .bind(guild_id as i64)
        .bind(module.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error)?;
        let mut commands: CommandFlags = serde_json::from_str(&flags_json).map_err(store_error)?;

        let changed = update.apply(&mut commands);
        if changed {
            let flags_json = serde_json::to_string(&commands).map_err(store_error)?;
            sqlx::query(
                "UPDATE module_state SET command_flags = ? WHERE guild_id = ? AND module_name = ?",
            )
            .bind(flags_json)
            .bind(guild_id as i64)
            .bind(module.as_str())
            .execute(&mut *tx)
            .await
            .map_err(store_error)?;
        }

        tx.commit().await.map_err(store_error)?;
        Ok(Some(changed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::modules::ModuleService;
    use crate::infra::database;
    use std::time::Duration;

    async fn open_store(dir: &tempfile::TempDir) -> SqliteModuleStore {
        let path = dir.path().join("modules.db");
        let pool = database::connect(path.to_str().unwrap(), 2, Duration::from_secs(5))
            .await
            .unwrap();
        let store = SqliteModuleStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_state_round_trips_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let service = ModuleService::new(
            open_store(&dir).await,
            ModuleKind::Economy,
            &["daily", "giveall"],
        );

        service.load(42).await.unwrap();
        service.set_command_enabled(42, "giveall", false).await.unwrap();
        service.disable(42).await.unwrap();

        let state = service.get_state(42).await.unwrap().unwrap();
        assert!(!state.enabled);
        assert!(state.commands.is_enabled("daily"));
        assert!(!state.commands.is_enabled("giveall"));

        // Other guilds are untouched.
        assert!(service.get_state(43).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_flags_are_a_store_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        sqlx::query(
            "INSERT INTO module_state (guild_id, module_name, enabled, command_flags) VALUES (1, 'economy', 1, 'not json')",
        )
        .execute(&store.pool)
        .await
        .unwrap();

        assert!(matches!(
            store.get_state(1, ModuleKind::Economy).await,
            Err(ModuleError::StoreFailure(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_toggles_keep_both_writes() {
        let dir = tempfile::tempdir().unwrap();
        let service = std::sync::Arc::new(ModuleService::new(
            open_store(&dir).await,
            ModuleKind::Economy,
            &["daily", "points", "giveall"],
        ));
        service.load(9).await.unwrap();

        let mut handles = Vec::new();
        for command in ["daily", "points", "giveall"] {
            let service = std::sync::Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service.set_command_enabled(9, command, false).await
            }));
        }
        let disabler = {
            let service = std::sync::Arc::clone(&service);
            tokio::spawn(async move { service.disable(9).await })
        };
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        disabler.await.unwrap().unwrap();

        // Reloading only registers commands; it leaves `enabled` alone.
        let state = service.load(9).await.unwrap();
        assert!(!state.enabled);
        assert!(state.commands.iter().all(|(_, enabled)| !enabled));
    }
}
