// The infra module contains implementations of core traits.
// Each feature implementation goes in its own submodule.

pub mod database;

#[path = "economy/mod.rs"]
pub mod economy;

#[path = "modules/mod.rs"]
pub mod modules;
