// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "economy/mod.rs"]
pub mod economy;

#[path = "modules/mod.rs"]
pub mod modules;
