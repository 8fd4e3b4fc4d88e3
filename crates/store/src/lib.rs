//! Generation-config store backends for Parley.
//!
//! Backends:
//! - **SQLite** — sqlx-backed relational store (default)
//! - **In-memory** — `HashMap`-backed, for tests and ephemeral runs

pub mod in_memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
