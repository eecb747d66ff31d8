//! SQLite storage backend

use crate::auth::{Grant, Permission, Role, Tier, User, UserStats};
use crate::store::StorageError;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user (
    user TEXT PRIMARY KEY,
    pass TEXT NOT NULL,
    role TEXT NOT NULL,
    tier TEXT,
    provisioned INTEGER NOT NULL DEFAULT 0,
    messages INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS user_access (
    user TEXT NOT NULL,
    topic TEXT NOT NULL,
    permission TEXT NOT NULL,
    provisioned INTEGER NOT NULL DEFAULT 0,
    seq INTEGER NOT NULL,
    PRIMARY KEY (user, topic)
);

CREATE INDEX IF NOT EXISTS user_access_user_idx ON user_access(user);

CREATE TABLE IF NOT EXISTS tier (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    message_limit INTEGER NOT NULL
);
"#;

/// A grant row as stored, including the write sequence number
///
/// The sequence number is internal to the store and the resolution engine;
/// it records recency for tie-breaking and is not part of [`Grant`].
#[derive(Debug, Clone)]
pub struct GrantRow {
    pub topic_pattern: String,
    pub permission: Permission,
    pub provisioned: bool,
    pub seq: i64,
}

/// SQLite storage for users, grants, tiers and usage counters
///
/// The connection sits behind a mutex, so every statement runs exclusively.
/// Multi-statement writes use explicit transactions.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open an existing database file and set up the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path.as_ref())?;

        // WAL keeps hot-path reads from stalling behind admin writes
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute_batch(SCHEMA)?;

        info!(path = %path.as_ref().display(), "Auth database opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // --- users ---

    pub fn insert_user(
        &self,
        name: &str,
        password_hash: &str,
        role: Role,
        provisioned: bool,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user (user, pass, role, provisioned) VALUES (?1, ?2, ?3, ?4)",
            params![name, password_hash, role.to_string(), provisioned],
        )?;
        debug!(user = %name, role = %role, provisioned, "Inserted user");
        Ok(())
    }

    /// Insert or replace a provisioned user, preserving any existing usage counters
    pub fn upsert_provisioned_user(
        &self,
        name: &str,
        password_hash: &str,
        role: Role,
        tier: Option<&str>,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user (user, pass, role, tier, provisioned) VALUES (?1, ?2, ?3, ?4, 1)
             ON CONFLICT(user) DO UPDATE SET
                 pass = excluded.pass,
                 role = excluded.role,
                 tier = excluded.tier,
                 provisioned = 1",
            params![name, password_hash, role.to_string(), tier],
        )?;
        Ok(())
    }

    pub fn user(&self, name: &str) -> Result<Option<User>, StorageError> {
        let conn = self.conn.lock();
        let user = conn
            .query_row(
                "SELECT u.user, u.pass, u.role, u.provisioned, u.messages,
                        t.code, t.name, t.message_limit
                 FROM user u LEFT JOIN tier t ON u.tier = t.code
                 WHERE u.user = ?1",
                params![name],
                row_to_user,
            )
            .optional()?;
        user.transpose()
    }

    /// All registered users, name-ordered
    pub fn users(&self) -> Result<Vec<User>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT u.user, u.pass, u.role, u.provisioned, u.messages,
                    t.code, t.name, t.message_limit
             FROM user u LEFT JOIN tier t ON u.tier = t.code
             ORDER BY u.user",
        )?;
        let rows = stmt.query_map([], row_to_user)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row??);
        }
        Ok(users)
    }

    /// Returns false if the user does not exist
    pub fn update_password(&self, name: &str, password_hash: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE user SET pass = ?1 WHERE user = ?2",
            params![password_hash, name],
        )?;
        Ok(changed > 0)
    }

    pub fn update_role(&self, name: &str, role: Role) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE user SET role = ?1 WHERE user = ?2",
            params![role.to_string(), name],
        )?;
        Ok(changed > 0)
    }

    pub fn update_tier(&self, name: &str, tier_code: Option<&str>) -> Result<bool, StorageError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE user SET tier = ?1 WHERE user = ?2",
            params![tier_code, name],
        )?;
        Ok(changed > 0)
    }

    /// Delete a user and all of their grants in one transaction
    pub fn delete_user(&self, name: &str) -> Result<bool, StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM user_access WHERE user = ?1", params![name])?;
        let deleted = tx.execute("DELETE FROM user WHERE user = ?1", params![name])?;
        tx.commit()?;
        debug!(user = %name, "Deleted user and grants");
        Ok(deleted > 0)
    }

    // --- grants ---

    /// All grants owned by a user, pattern-ordered for stable display
    pub fn grants(&self, name: &str) -> Result<Vec<Grant>, StorageError> {
        Ok(self
            .grant_rows(name)?
            .into_iter()
            .map(|row| Grant {
                topic_pattern: row.topic_pattern,
                permission: row.permission,
                provisioned: row.provisioned,
            })
            .collect())
    }

    /// Grant rows including recency, for the resolution engine
    pub fn grant_rows(&self, name: &str) -> Result<Vec<GrantRow>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT topic, permission, provisioned, seq
             FROM user_access WHERE user = ?1 ORDER BY topic",
        )?;
        let rows = stmt.query_map(params![name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;
        let mut grants = Vec::new();
        for row in rows {
            let (topic, permission, provisioned, seq) = row?;
            let permission = Permission::parse(&permission)
                .ok_or_else(|| StorageError::Decode(format!("unknown permission: {permission}")))?;
            grants.push(GrantRow {
                topic_pattern: topic,
                permission,
                provisioned,
                seq,
            });
        }
        Ok(grants)
    }

    /// Insert or overwrite the grant for (user, topic pattern)
    pub fn upsert_grant(
        &self,
        name: &str,
        topic_pattern: &str,
        permission: Permission,
        provisioned: bool,
    ) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO user_access (user, topic, permission, provisioned, seq)
             VALUES (?1, ?2, ?3, ?4, (SELECT COALESCE(MAX(seq), 0) + 1 FROM user_access))
             ON CONFLICT(user, topic) DO UPDATE SET
                 permission = excluded.permission,
                 provisioned = excluded.provisioned,
                 seq = excluded.seq",
            params![name, topic_pattern, permission.to_string(), provisioned],
        )?;
        debug!(user = %name, topic = %topic_pattern, permission = %permission, "Upserted grant");
        Ok(())
    }

    /// Delete every non-provisioned grant, returns the number removed
    pub fn reset_all(&self) -> Result<usize, StorageError> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM user_access WHERE provisioned = 0", [])?)
    }

    /// Delete a user's non-provisioned grants
    pub fn reset_user(&self, name: &str) -> Result<usize, StorageError> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM user_access WHERE provisioned = 0 AND user = ?1",
            params![name],
        )?)
    }

    /// Delete one non-provisioned grant
    pub fn reset_user_topic(&self, name: &str, topic_pattern: &str) -> Result<usize, StorageError> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM user_access WHERE provisioned = 0 AND user = ?1 AND topic = ?2",
            params![name, topic_pattern],
        )?)
    }

    // --- tiers ---

    pub fn upsert_tier(&self, tier: &Tier) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO tier (code, name, message_limit) VALUES (?1, ?2, ?3)
             ON CONFLICT(code) DO UPDATE SET
                 name = excluded.name,
                 message_limit = excluded.message_limit",
            params![tier.code, tier.name, tier.message_limit],
        )?;
        Ok(())
    }

    pub fn tier(&self, code: &str) -> Result<Option<Tier>, StorageError> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT code, name, message_limit FROM tier WHERE code = ?1",
                params![code],
                row_to_tier,
            )
            .optional()?)
    }

    pub fn tiers(&self) -> Result<Vec<Tier>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT code, name, message_limit FROM tier ORDER BY code")?;
        let rows = stmt.query_map([], row_to_tier)?;
        let mut tiers = Vec::new();
        for row in rows {
            tiers.push(row?);
        }
        Ok(tiers)
    }

    // --- stats ---

    /// Apply a batch of per-user message-count increments in one transaction
    ///
    /// Counts for names without a user row are silently discarded; the user
    /// may have been removed between enqueue and flush.
    pub fn add_message_stats(&self, counts: &BTreeMap<String, u64>) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for (name, messages) in counts {
            tx.execute(
                "UPDATE user SET messages = messages + ?1 WHERE user = ?2",
                params![*messages as i64, name],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    // --- provisioning ---

    /// Remove every provisioned user and grant, ahead of a config reload
    pub fn drop_provisioned(&self) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM user_access WHERE provisioned = 1", [])?;
        tx.execute("DELETE FROM user WHERE provisioned = 1", [])?;
        tx.commit()?;
        Ok(())
    }
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<Result<User, StorageError>> {
    let name: String = row.get(0)?;
    let password_hash: String = row.get(1)?;
    let role: String = row.get(2)?;
    let provisioned: bool = row.get(3)?;
    let messages: i64 = row.get(4)?;
    let tier_code: Option<String> = row.get(5)?;

    let tier = match tier_code {
        Some(code) => Some(Tier {
            code,
            name: row.get(6)?,
            message_limit: row.get::<_, i64>(7)? as u64,
        }),
        None => None,
    };

    Ok(match Role::parse(&role) {
        Some(role) => Ok(User {
            name,
            password_hash,
            role,
            tier,
            provisioned,
            stats: UserStats {
                messages: messages as u64,
            },
        }),
        None => Err(StorageError::Decode(format!("unknown role: {role}"))),
    })
}

fn row_to_tier(row: &Row<'_>) -> rusqlite::Result<Tier> {
    Ok(Tier {
        code: row.get(0)?,
        name: row.get(1)?,
        message_limit: row.get::<_, i64>(2)? as u64,
    })
}
