// Module lifecycle - per-guild enable/disable state shared by bot modules

mod module_service;

pub use module_service::{
    CommandFlags, CommandUpdate, ModuleError, ModuleKind, ModuleService, ModuleState, ModuleStore,
};
