// Economy module - event catalog, award engine and point totals

pub mod economy_module;
mod economy_service;
pub mod event_catalog;

pub use economy_module::{load_for_guild, ECONOMY_COMMANDS};
pub use economy_service::{
    AwardOutcome, EconomyError, EconomyService, EconomyStore, GuildId, ReconcileReport, UserId,
    UserPoints, DEFAULT_FANOUT_CONCURRENCY,
};
pub use event_catalog::EventDefinition;
