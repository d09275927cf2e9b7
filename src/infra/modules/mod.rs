// Module lifecycle infrastructure - SQLite storage implementation

mod sqlite_module_store;

pub use sqlite_module_store::SqliteModuleStore;
