//! Persistence for users, grants, tiers and usage counters
//!
//! Single SQLite backend. The file must already exist when the store is
//! opened; creating it is the responsibility of whoever bootstraps the
//! server, not this crate.

mod sqlite;

pub use sqlite::{GrantRow, SqliteStore};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt record: {0}")]
    Decode(String),
}
