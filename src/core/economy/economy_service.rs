// Economy system core - event awards and point totals.
//
// Platform-agnostic: no Discord types in here. Persistence sits behind
// `EconomyStore` so the SQLite store and the in-memory store are interchangeable.
//
// The ledger has two halves. `event_log` is append-only and is the source of
// truth for how often a user triggered an event. `user_points` is the running
// total derived from it. Only `EconomyStore::record_award` writes either one.

use super::event_catalog::{default_definitions, EventCatalog, EventDefinition};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type GuildId = u64;
pub type UserId = u64;

/// Concurrent awards in flight during a mass award when nothing is configured.
pub const DEFAULT_FANOUT_CONCURRENCY: usize = 8;

// ============================================================================
// DOMAIN MODELS
// ============================================================================

/// One row of the aggregate: a user's running total in a guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPoints {
    pub user_id: UserId,
    pub points: u64,
}

/// What the store did with an award attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AwardOutcome {
    /// Log row appended and total updated in the same transaction.
    Recorded {
        points_awarded: u64,
        new_total: u64,
        occurrences: u64,
    },
    /// Every slot is used; nothing was written.
    LimitReached { occurrences: u64 },
    /// The definition vanished between lookup and write.
    DefinitionMissing,
}

/// Successful award, returned to the caller for rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwardReceipt {
    pub event_key: String,
    pub event_name: String,
    pub points_awarded: u64,
    pub new_total: u64,
    /// How many times the user has now triggered this event.
    pub occurrences: u64,
}

/// Result of a mass award. `attempted` counts every candidate handed in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MassAwardSummary {
    pub attempted: usize,
    pub awarded: usize,
    pub already_claimed: usize,
    pub unknown_event: usize,
    pub failed: usize,
}

/// Result of recomputing a guild's totals from its event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Users holding a total in the guild once reconciled.
    pub users: usize,
    /// Totals that disagreed with the log and were rewritten.
    pub corrected: usize,
    /// Log rows whose event definition no longer exists (counted as 0 points).
    pub dangling_entries: u64,
}

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum EconomyError {
    #[error("Unknown event key [{0}]")]
    UnknownEvent(String),

    #[error("Event [{event_key}] can only be awarded {max_occurrence} time(s)")]
    OccurrenceLimitReached {
        event_key: String,
        max_occurrence: u32,
    },

    #[error("Leaderboard limit must be at least 1")]
    InvalidLimit,

    #[error("Store error: {0}")]
    StoreFailure(String),
}

// ============================================================================
// STORAGE TRAIT
// ============================================================================

#[async_trait]
pub trait EconomyStore: Send + Sync {
    /// Insert every definition whose key is absent. Existing rows are left
    /// untouched so administrator edits survive. Returns how many were inserted.
    async fn seed_definitions(&self, defaults: &[EventDefinition]) -> Result<usize, EconomyError>;

    async fn find_definition(&self, key: &str) -> Result<Option<EventDefinition>, EconomyError>;

    async fn list_definitions(&self) -> Result<Vec<EventDefinition>, EconomyError>;

    /// Count check, log append and total upsert as one atomic unit.
    ///
    /// Either both the log row and the increment become visible, or neither
    /// does. Two concurrent calls for the same (guild, user, event) must never
    /// both pass the occurrence check when only one slot is left.
    async fn record_award(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        definition: &EventDefinition,
    ) -> Result<AwardOutcome, EconomyError>;

    /// How many log rows exist for this (definition, guild, user).
    async fn count_awards(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        definition_id: i64,
    ) -> Result<u64, EconomyError>;

    /// `None` when the user has never earned points in this guild.
    async fn get_user_points(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<u64>, EconomyError>;

    /// Highest totals first; ties in insertion order.
    async fn get_top_users(
        &self,
        guild_id: GuildId,
        limit: usize,
    ) -> Result<Vec<UserPoints>, EconomyError>;

    /// Rebuild every total in the guild from the log. Log rows whose
    /// definition is gone count as 0 points.
    async fn reconcile_guild(&self, guild_id: GuildId) -> Result<ReconcileReport, EconomyError>;
}

// ============================================================================
// CORE SERVICE
// ============================================================================

/// Award engine and query surface over an `EconomyStore`.
pub struct EconomyService<S: EconomyStore> {
    store: S,
    catalog: EventCatalog,
    fanout_concurrency: usize,
}

impl<S: EconomyStore> EconomyService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            catalog: EventCatalog::new(),
            fanout_concurrency: DEFAULT_FANOUT_CONCURRENCY,
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    /// Bound how many awards a mass award keeps in flight at once.
    pub fn with_fanout_concurrency(mut self, concurrency: usize) -> Self {
        self.fanout_concurrency = concurrency.max(1);
        self
    }

    /// Make sure the built-in events exist, then refresh the cache.
    ///
    /// Safe to call on every module load.
    pub async fn seed_defaults(&self) -> Result<usize, EconomyError> {
        let inserted = self.store.seed_definitions(&default_definitions()).await?;
        if inserted > 0 {
            tracing::info!(inserted, "Seeded default economy events");
        }
        self.catalog.refresh(self.store.list_definitions().await?);
        Ok(inserted)
    }

    /// Resolve an event key, cache first.
    pub async fn lookup(&self, event_key: &str) -> Result<EventDefinition, EconomyError> {
        if let Some(definition) = self.catalog.get(event_key) {
            return Ok(definition);
        }

        match self.store.find_definition(event_key).await? {
            Some(definition) => {
                self.catalog.insert(definition.clone());
                Ok(definition)
            }
            None => Err(EconomyError::UnknownEvent(event_key.to_string())),
        }
    }

    /// Every known event, ordered by key. Definitions are global, not per guild.
    pub async fn list_events(&self) -> Result<Vec<EventDefinition>, EconomyError> {
        if self.catalog.is_empty() {
            self.catalog.refresh(self.store.list_definitions().await?);
        }
        Ok(self.catalog.all())
    }

    /// Award `event_key` to a user if they still have a free occurrence slot.
    ///
    /// `OccurrenceLimitReached` is an expected outcome, not a fault. The engine
    /// never retries a failed write: after an ambiguous failure a retry could
    /// award twice.
    pub async fn award_event(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        event_key: &str,
    ) -> Result<AwardReceipt, EconomyError> {
        let mut definition = self.lookup(event_key).await?;
        let mut outcome = self.record(guild_id, user_id, &definition).await?;

        if outcome == AwardOutcome::DefinitionMissing {
            // The cached id is stale. The key may have been recreated under a
            // new id, so resolve it against the store once more.
            self.catalog.remove(event_key);
            definition = self.lookup(event_key).await?;
            outcome = self.record(guild_id, user_id, &definition).await?;
        }

        match outcome {
            AwardOutcome::Recorded {
                points_awarded,
                new_total,
                occurrences,
            } => {
                tracing::debug!(
                    guild_id,
                    user_id,
                    event_key,
                    points = points_awarded,
                    new_total,
                    "Event awarded"
                );
                Ok(AwardReceipt {
                    event_key: definition.key,
                    event_name: definition.name,
                    points_awarded,
                    new_total,
                    occurrences,
                })
            }
            AwardOutcome::LimitReached { .. } => Err(EconomyError::OccurrenceLimitReached {
                event_key: definition.key,
                max_occurrence: definition.max_occurrence,
            }),
            AwardOutcome::DefinitionMissing => {
                self.catalog.remove(event_key);
                Err(EconomyError::UnknownEvent(event_key.to_string()))
            }
        }
    }

    async fn record(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        definition: &EventDefinition,
    ) -> Result<AwardOutcome, EconomyError> {
        self.store
            .record_award(guild_id, user_id, definition)
            .await
            .map_err(|e| {
                tracing::error!(guild_id, user_id, event_key = %definition.key, error = %e, "Failed to record award");
                e
            })
    }

    /// Award `event_key` to every candidate, keeping at most
    /// `fanout_concurrency` awards in flight.
    ///
    /// Callers filter candidates (bots etc.) before handing them in. Individual
    /// failures are counted and the fan-out carries on.
    pub async fn award_event_to_all(
        &self,
        guild_id: GuildId,
        event_key: &str,
        user_ids: &[UserId],
    ) -> MassAwardSummary {
        let outcomes: Vec<(UserId, Result<AwardReceipt, EconomyError>)> =
            stream::iter(user_ids.iter().copied())
                .map(|user_id| async move {
                    let outcome = self.award_event(guild_id, user_id, event_key).await;
                    (user_id, outcome)
                })
                .buffer_unordered(self.fanout_concurrency)
                .collect()
                .await;

        let mut summary = MassAwardSummary {
            attempted: user_ids.len(),
            ..MassAwardSummary::default()
        };

        for (user_id, outcome) in outcomes {
            match outcome {
                Ok(_) => summary.awarded += 1,
                Err(EconomyError::OccurrenceLimitReached { .. }) => summary.already_claimed += 1,
                Err(EconomyError::UnknownEvent(_)) => summary.unknown_event += 1,
                Err(e) => {
                    tracing::warn!(guild_id, user_id, event_key, error = %e, "Mass award failed for user");
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            guild_id,
            event_key,
            attempted = summary.attempted,
            awarded = summary.awarded,
            failed = summary.failed,
            "Mass award complete"
        );

        summary
    }

    /// A user's total; `0` if they never earned anything here.
    pub async fn get_user_total(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<u64, EconomyError> {
        Ok(self
            .store
            .get_user_points(guild_id, user_id)
            .await?
            .unwrap_or(0))
    }

    /// How many times the user has triggered `event_key` in this guild.
    pub async fn get_occurrences(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        event_key: &str,
    ) -> Result<u64, EconomyError> {
        let definition = self.lookup(event_key).await?;
        self.store
            .count_awards(guild_id, user_id, definition.id)
            .await
    }

    /// Top `limit` users by points, highest first.
    pub async fn get_top_users(
        &self,
        guild_id: GuildId,
        limit: usize,
    ) -> Result<Vec<UserPoints>, EconomyError> {
        if limit == 0 {
            return Err(EconomyError::InvalidLimit);
        }
        self.store.get_top_users(guild_id, limit).await
    }

    /// Recompute every total in the guild from the event log.
    pub async fn reconcile_guild(&self, guild_id: GuildId) -> Result<ReconcileReport, EconomyError> {
        let report = self.store.reconcile_guild(guild_id).await?;

        if report.dangling_entries > 0 {
            tracing::warn!(
                guild_id,
                dangling_entries = report.dangling_entries,
                "Event log references deleted definitions; counting them as 0 points"
            );
        }
        if report.corrected > 0 {
            tracing::info!(guild_id, corrected = report.corrected, "Corrected point totals");
        }

        Ok(report)
    }
}

// ============================================================================
// TESTS
// ============================================================================
