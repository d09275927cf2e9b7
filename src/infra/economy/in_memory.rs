// In-memory implementation of EconomyStore.
//
// The whole ledger sits behind one mutex, so `record_award` is trivially
// atomic. Test-only: the core service tests run against it.

use crate::core::economy::{
    AwardOutcome, EconomyError, EconomyStore, EventDefinition, GuildId, ReconcileReport, UserId,
    UserPoints,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
struct LogEntry {
    /// `None` once the referenced definition is deleted.
    definition_id: Option<i64>,
    guild_id: GuildId,
    user_id: UserId,
}

/// Rows kept in insertion order, which doubles as the leaderboard tie-breaker.
#[derive(Debug, Clone)]
struct PointsRow {
    guild_id: GuildId,
    user_id: UserId,
    points: u64,
}

#[derive(Debug, Default)]
struct Ledger {
    definitions: Vec<EventDefinition>,
    next_definition_id: i64,
    log: Vec<LogEntry>,
    points: Vec<PointsRow>,
}

impl Ledger {
    fn definition(&self, id: i64) -> Option<&EventDefinition> {
        self.definitions.iter().find(|d| d.id == id)
    }

    fn count(&self, guild_id: GuildId, user_id: UserId, definition_id: i64) -> u64 {
        self.log
            .iter()
            .filter(|entry| {
                entry.definition_id == Some(definition_id)
                    && entry.guild_id == guild_id
                    && entry.user_id == user_id
            })
            .count() as u64
    }

    fn insert_definition(&mut self, mut definition: EventDefinition) {
        self.next_definition_id += 1;
        definition.id = self.next_definition_id;
        self.definitions.push(definition);
    }
}

#[derive(Default)]
pub struct InMemoryEconomyStore {
    ledger: Mutex<Ledger>,
}

impl InMemoryEconomyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ledger(&self) -> Result<MutexGuard<'_, Ledger>, EconomyError> {
        self.ledger
            .lock()
            .map_err(|_| EconomyError::StoreFailure("ledger lock poisoned".to_string()))
    }

    /// Administrative catalog edit: insert, or overwrite name/points/limit.
    pub fn upsert_definition(&self, definition: EventDefinition) {
        let Ok(mut ledger) = self.ledger.lock() else {
            return;
        };
        match ledger.definitions.iter_mut().find(|d| d.key == definition.key) {
            Some(existing) => {
                existing.name = definition.name;
                existing.points = definition.points;
                existing.max_occurrence = definition.max_occurrence;
            }
            None => ledger.insert_definition(definition),
        }
    }

    /// Delete a definition; its log rows keep existing with no reference.
    pub fn delete_definition(&self, key: &str) {
        let Ok(mut ledger) = self.ledger.lock() else {
            return;
        };
        let Some(position) = ledger.definitions.iter().position(|d| d.key == key) else {
            return;
        };
        let removed = ledger.definitions.remove(position);
        for entry in ledger.log.iter_mut() {
            if entry.definition_id == Some(removed.id) {
                entry.definition_id = None;
            }
        }
    }
}

#[async_trait]
impl EconomyStore for InMemoryEconomyStore {
    async fn seed_definitions(&self, defaults: &[EventDefinition]) -> Result<usize, EconomyError> {
        let mut ledger = self.ledger()?;
        let mut inserted = 0;
        for definition in defaults {
            if !ledger.definitions.iter().any(|d| d.key == definition.key) {
                ledger.insert_definition(definition.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn find_definition(&self, key: &str) -> Result<Option<EventDefinition>, EconomyError> {
        let ledger = self.ledger()?;
        Ok(ledger.definitions.iter().find(|d| d.key == key).cloned())
    }

    async fn list_definitions(&self) -> Result<Vec<EventDefinition>, EconomyError> {
        let ledger = self.ledger()?;
        let mut definitions = ledger.definitions.clone();
        definitions.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(definitions)
    }

    async fn record_award(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        definition: &EventDefinition,
    ) -> Result<AwardOutcome, EconomyError> {
        let mut ledger = self.ledger()?;

        // The stored row is authoritative for points and limit.
        let Some(current) = ledger.definition(definition.id).cloned() else {
            return Ok(AwardOutcome::DefinitionMissing);
        };

        let occurrences = ledger.count(guild_id, user_id, current.id);
        if current.limit_reached(occurrences) {
            return Ok(AwardOutcome::LimitReached { occurrences });
        }

        ledger.log.push(LogEntry {
            definition_id: Some(current.id),
            guild_id,
            user_id,
        });

        let new_total = match ledger
            .points
            .iter_mut()
            .find(|row| row.guild_id == guild_id && row.user_id == user_id)
        {
            Some(row) => {
                row.points += current.points;
                row.points
            }
            None => {
                ledger.points.push(PointsRow {
                    guild_id,
                    user_id,
                    points: current.points,
                });
                current.points
            }
        };

        Ok(AwardOutcome::Recorded {
            points_awarded: current.points,
            new_total,
            occurrences: occurrences + 1,
        })
    }

    async fn count_awards(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        definition_id: i64,
    ) -> Result<u64, EconomyError> {
        Ok(self.ledger()?.count(guild_id, user_id, definition_id))
    }

    async fn get_user_points(
        &self,
        guild_id: GuildId,
        user_id: UserId,
    ) -> Result<Option<u64>, EconomyError> {
        let ledger = self.ledger()?;
        Ok(ledger
            .points
            .iter()
            .find(|row| row.guild_id == guild_id && row.user_id == user_id)
            .map(|row| row.points))
    }

    async fn get_top_users(
        &self,
        guild_id: GuildId,
        limit: usize,
    ) -> Result<Vec<UserPoints>, EconomyError> {
        let ledger = self.ledger()?;
        let mut rows: Vec<UserPoints> = ledger
            .points
            .iter()
            .filter(|row| row.guild_id == guild_id)
            .map(|row| UserPoints {
                user_id: row.user_id,
                points: row.points,
            })
            .collect();
        // Stable sort keeps insertion order among equal totals.
        rows.sort_by(|a, b| b.points.cmp(&a.points));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn reconcile_guild(&self, guild_id: GuildId) -> Result<ReconcileReport, EconomyError> {
        let mut ledger = self.ledger()?;
        let mut report = ReconcileReport::default();

        let mut expected: HashMap<UserId, u64> = HashMap::new();
        for entry in ledger.log.iter().filter(|entry| entry.guild_id == guild_id) {
            let points = match entry.definition_id.and_then(|id| ledger.definition(id)) {
                Some(definition) => definition.points,
                None => {
                    report.dangling_entries += 1;
                    0
                }
            };
            *expected.entry(entry.user_id).or_insert(0) += points;
        }

        for row in ledger.points.iter_mut().filter(|row| row.guild_id == guild_id) {
            let target = expected.remove(&row.user_id).unwrap_or(0);
            if row.points != target {
                row.points = target;
                report.corrected += 1;
            }
            report.users += 1;
        }

        // Users with earned points but no total row yet.
        let mut missing: Vec<(UserId, u64)> = expected
            .into_iter()
            .filter(|(_, points)| *points > 0)
            .collect();
        missing.sort_unstable();
        for (user_id, points) in missing {
            ledger.points.push(PointsRow {
                guild_id,
                user_id,
                points,
            });
            report.corrected += 1;
            report.users += 1;
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(store: &InMemoryEconomyStore, key: &str) -> EventDefinition {
        store
            .ledger
            .lock()
            .unwrap()
            .definitions
            .iter()
            .find(|d| d.key == key)
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn test_seed_is_insert_if_absent() {
        let store = InMemoryEconomyStore::new();
        let defaults = vec![
            EventDefinition::new("A", "A", 1, 1),
            EventDefinition::new("B", "B", 2, 1),
        ];

        assert_eq!(store.seed_definitions(&defaults).await.unwrap(), 2);
        assert_eq!(store.seed_definitions(&defaults).await.unwrap(), 0);
        assert_eq!(store.list_definitions().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_record_award_updates_log_and_total() {
        let store = InMemoryEconomyStore::new();
        store.upsert_definition(EventDefinition::new("TWICE", "Twice", 40, 2));
        let twice = definition(&store, "TWICE");

        for expected in [40, 80] {
            match store.record_award(1, 10, &twice).await.unwrap() {
                AwardOutcome::Recorded { new_total, .. } => assert_eq!(new_total, expected),
                other => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(
            store.record_award(1, 10, &twice).await.unwrap(),
            AwardOutcome::LimitReached { occurrences: 2 }
        );
        assert_eq!(store.count_awards(1, 10, twice.id).await.unwrap(), 2);
        assert_eq!(store.get_user_points(1, 10).await.unwrap(), Some(80));
    }

    #[tokio::test]
    async fn test_reconcile_creates_missing_totals() {
        let store = InMemoryEconomyStore::new();
        store.upsert_definition(EventDefinition::new("A", "A", 7, 0));
        let a = definition(&store, "A");
        store.record_award(1, 10, &a).await.unwrap();

        // Simulate a lost aggregate row.
        store.ledger.lock().unwrap().points.clear();

        let report = store.reconcile_guild(1).await.unwrap();
        assert_eq!(report.users, 1);
        assert_eq!(report.corrected, 1);
        assert_eq!(store.get_user_points(1, 10).await.unwrap(), Some(7));
    }
}
