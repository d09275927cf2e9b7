// Discord commands module.
// Each feature gets its own command file.

pub mod economy;

pub mod economy_admin;

pub mod presence;
