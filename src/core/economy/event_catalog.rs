// Event catalog - the master list of recognized awardable events.
//
// Definitions are global (not per guild). They are seeded once per module load
// and then cached read-only for the lifetime of the process.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// A recognized awardable action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDefinition {
    /// Store row id, referenced by ledger entries. `0` until persisted.
    pub id: i64,
    pub key: String,
    pub name: String,
    pub points: u64,
    /// `0` means unlimited.
    pub max_occurrence: u32,
}

impl EventDefinition {
    pub fn new(key: &str, name: &str, points: u64, max_occurrence: u32) -> Self {
        Self {
            id: 0,
            key: key.to_string(),
            name: name.to_string(),
            points,
            max_occurrence,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        self.max_occurrence == 0
    }

    /// Has a user with `count` prior awards used up every slot?
    pub fn limit_reached(&self, count: u64) -> bool {
        !self.is_unlimited() && count >= u64::from(self.max_occurrence)
    }
}

pub const DAILY: &str = "DAILY";
pub const JOIN_SERVER: &str = "JOIN_SERVER";
pub const FIRST_MESSAGE: &str = "FIRST_MESSAGE";
pub const BOOST_SERVER: &str = "BOOST_SERVER";
pub const SUBMIT_DEPOSIT: &str = "SUBMIT_DEPOSIT";

/// Built-in definitions that every deployment starts with.
pub fn default_definitions() -> Vec<EventDefinition> {
    vec![
        EventDefinition::new(DAILY, "Daily Reward", 85, 1),
        EventDefinition::new(JOIN_SERVER, "Join the server", 213, 1),
        EventDefinition::new(FIRST_MESSAGE, "Send first message", 425, 1),
        EventDefinition::new("BIRTHDAY_SET", "Set your birthday", 595, 1),
        EventDefinition::new(
            "RESPOND_DAILY_ENGAGEMENT",
            "Respond to Daily Engagement",
            850,
            1,
        ),
        EventDefinition::new("VERIFY_ACCOUNT", "Verify Account", 850, 1),
        EventDefinition::new(BOOST_SERVER, "Boost server", 3570, 1),
        EventDefinition::new(SUBMIT_DEPOSIT, "Submit enrollment deposit", 34000, 1),
        EventDefinition::new(
            "SOCIAL_MEDIA_ENGAGEMENT",
            "Social Media Engagement",
            850,
            1,
        ),
    ]
}

/// Process-local read cache over the stored catalog.
#[derive(Default)]
pub struct EventCatalog {
    by_key: DashMap<String, EventDefinition>,
}

impl EventCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached view with what the store currently holds.
    pub fn refresh(&self, definitions: Vec<EventDefinition>) {
        self.by_key.clear();
        for definition in definitions {
            self.by_key.insert(definition.key.clone(), definition);
        }
    }

    pub fn get(&self, key: &str) -> Option<EventDefinition> {
        self.by_key.get(key).map(|entry| entry.clone())
    }

    pub fn insert(&self, definition: EventDefinition) {
        self.by_key.insert(definition.key.clone(), definition);
    }

    pub fn remove(&self, key: &str) {
        self.by_key.remove(key);
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// All cached definitions, ordered by key.
    pub fn all(&self) -> Vec<EventDefinition> {
        let mut definitions: Vec<EventDefinition> =
            self.by_key.iter().map(|entry| entry.value().clone()).collect();
        definitions.sort_by(|a, b| a.key.cmp(&b.key));
        definitions
    }
}
