// Per-guild module lifecycle: uninitialized -> enabled <-> disabled.
//
// Every bot module gets one `ModuleState` per guild, keyed by `ModuleKind`.
// Disabling a module only makes its commands unreachable; it never touches
// the module's own data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// Modules that keep lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    Economy,
}

impl ModuleKind {
    /// Name used as the storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleKind::Economy => "economy",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ModuleKind::Economy => "Points & achievements system",
        }
    }
}

/// Per-command enable flags, keyed by command name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandFlags(BTreeMap<String, bool>);

impl CommandFlags {
    /// Every command starts enabled.
    pub fn all_enabled(commands: &[&str]) -> Self {
        Self(
            commands
                .iter()
                .map(|name| (name.to_string(), true))
                .collect(),
        )
    }

    /// Unknown commands count as disabled.
    pub fn is_enabled(&self, command: &str) -> bool {
        self.0.get(command).copied().unwrap_or(false)
    }

    pub fn set(&mut self, command: &str, enabled: bool) {
        self.0.insert(command.to_string(), enabled);
    }

    /// Add any command missing from the map as enabled. Returns true if
    /// something was added.
    pub fn reconcile(&mut self, known: &[&str]) -> bool {
        let mut added = false;
        for name in known {
            if !self.0.contains_key(*name) {
                self.0.insert(name.to_string(), true);
                added = true;
            }
        }
        added
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.0.iter().map(|(name, enabled)| (name.as_str(), *enabled))
    }
}

/// A change to one guild's command flags, applied under the store's write lock.
#[derive(Debug, Clone, Copy)]
pub enum CommandUpdate<'a> {
    /// Add commands the stored map doesn't know yet, enabled.
    Register(&'a [&'a str]),
    Set { command: &'a str, enabled: bool },
}

impl CommandUpdate<'_> {
    /// Returns true if the flags changed.
    pub fn apply(&self, flags: &mut CommandFlags) -> bool {
        match *self {
            CommandUpdate::Register(known) => flags.reconcile(known),
            CommandUpdate::Set { command, enabled } => {
                let changed = flags.0.get(command) != Some(&enabled);
                flags.set(command, enabled);
                changed
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleState {
    pub guild_id: u64,
    pub module: ModuleKind,
    pub enabled: bool,
    pub commands: CommandFlags,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Module is already enabled")]
    AlreadyEnabled,

    #[error("Module is already disabled")]
    AlreadyDisabled,

    #[error("Module has not been loaded for this guild")]
    NotLoaded,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Store error: {0}")]
    StoreFailure(String),
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Each write changes only the field it targets, and only conditionally.
#[async_trait]
pub trait ModuleStore: Send + Sync {
    async fn get_state(
        &self,
        guild_id: u64,
        module: ModuleKind,
    ) -> Result<Option<ModuleState>, ModuleError>;

    /// Insert the row unless one exists. Returns true if this call created it.
    async fn insert_state(&self, state: &ModuleState) -> Result<bool, ModuleError>;

    /// Set `enabled` only if it currently differs. Returns false when nothing
    /// was written (already in that state, or no row).
    async fn set_enabled(
        &self,
        guild_id: u64,
        module: ModuleKind,
        enabled: bool,
    ) -> Result<bool, ModuleError>;

    /// Apply `update` to the stored command flags alone, serialized against
    /// other writers. `None` when there is no row, otherwise whether the
    /// flags changed.
    async fn update_commands(
        &self,
        guild_id: u64,
        module: ModuleKind,
        update: CommandUpdate<'_>,
    ) -> Result<Option<bool>, ModuleError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Lifecycle manager for one module across all guilds.
pub struct ModuleService<S: ModuleStore> {
    store: S,
    module: ModuleKind,
    known_commands: &'static [&'static str],
}

impl<S: ModuleStore> ModuleService<S> {
    pub fn new(store: S, module: ModuleKind, known_commands: &'static [&'static str]) -> Self {
        Self {
            store,
            module,
            known_commands,
        }
    }

    /// Create the state enabled if absent, otherwise add any newly introduced
    /// commands (enabled). Never touches an existing `enabled` flag.
    pub async fn load(&self, guild_id: u64) -> Result<ModuleState, ModuleError> {
        let fresh = ModuleState {
            guild_id,
            module: self.module,
            enabled: true,
            commands: CommandFlags::all_enabled(self.known_commands),
        };
        if self.store.insert_state(&fresh).await? {
            tracing::info!(guild_id, module = self.module.as_str(), "Module created");
            return Ok(fresh);
        }

        let registered = self
            .store
            .update_commands(
                guild_id,
                self.module,
                CommandUpdate::Register(self.known_commands),
            )
            .await?
            .ok_or(ModuleError::NotLoaded)?;
        if registered {
            tracing::debug!(
                guild_id,
                module = self.module.as_str(),
                "Registered new module commands"
            );
        }

        self.require_state(guild_id).await
    }

    pub async fn enable(&self, guild_id: u64) -> Result<(), ModuleError> {
        if !self.store.set_enabled(guild_id, self.module, true).await? {
            self.require_state(guild_id).await?;
            return Err(ModuleError::AlreadyEnabled);
        }
        tracing::info!(guild_id, module = self.module.as_str(), "Module enabled");
        Ok(())
    }

    pub async fn disable(&self, guild_id: u64) -> Result<(), ModuleError> {
        if !self.store.set_enabled(guild_id, self.module, false).await? {
            self.require_state(guild_id).await?;
            return Err(ModuleError::AlreadyDisabled);
        }
        tracing::info!(guild_id, module = self.module.as_str(), "Module disabled");
        Ok(())
    }

    /// `false` for guilds where the module was never loaded.
    pub async fn status(&self, guild_id: u64) -> Result<bool, ModuleError> {
        Ok(self
            .store
            .get_state(guild_id, self.module)
            .await?
            .map(|state| state.enabled)
            .unwrap_or(false))
    }

    pub async fn get_state(&self, guild_id: u64) -> Result<Option<ModuleState>, ModuleError> {
        self.store.get_state(guild_id, self.module).await
    }

    /// Is `command` reachable in this guild right now?
    pub async fn is_command_enabled(&self, guild_id: u64, command: &str) -> Result<bool, ModuleError> {
        Ok(self
            .store
            .get_state(guild_id, self.module)
            .await?
            .map(|state| state.enabled && state.commands.is_enabled(command))
            .unwrap_or(false))
    }

    pub async fn set_command_enabled(
        &self,
        guild_id: u64,
        command: &str,
        enabled: bool,
    ) -> Result<(), ModuleError> {
        if !self.known_commands.contains(&command) {
            return Err(ModuleError::UnknownCommand(command.to_string()));
        }
        self.store
            .update_commands(guild_id, self.module, CommandUpdate::Set { command, enabled })
            .await?
            .ok_or(ModuleError::NotLoaded)?;
        tracing::info!(guild_id, module = self.module.as_str(), command, enabled, "Command toggled");
        Ok(())
    }

    async fn require_state(&self, guild_id: u64) -> Result<ModuleState, ModuleError> {
        self.store
            .get_state(guild_id, self.module)
            .await?
            .ok_or(ModuleError::NotLoaded)
    }
}

// ============================================================================
// TESTS
// ============================================================================
