// Economy infrastructure - SQLite storage, plus an in-memory store for tests

#[cfg(test)]
mod in_memory;
mod sqlite_economy_store;

#[cfg(test)]
pub use in_memory::InMemoryEconomyStore;
pub use sqlite_economy_store::SqliteEconomyStore;
