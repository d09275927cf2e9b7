// Discord layer - commands and event handlers.

#[path = "commands/command_catalog.rs"]
pub mod commands;

pub mod hooks;

// Re-export command types for convenience
pub use commands::economy::{Context, Data, Error};
