//! The access-control manager
//!
//! Single facade over the user registry, grant store and stats writer.
//! Administrative operations mutate through here and propagate errors
//! synchronously; [`Manager::resolve`] sits on the publish/subscribe hot
//! path and never fails, degrading to the configured default instead.

use crate::auth::{
    hash_password, Grant, Permission, Role, Tier, User, DEFAULT_BCRYPT_COST, EVERYONE,
    EVERYONE_ALIAS,
};
use crate::stats::{self, StatsEvent, StatsQueue, StatsWriter};
use crate::store::{GrantRow, SqliteStore, StorageError};
use crate::topics::{PatternError, TopicPattern};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("user {0} already exists")]
    UserExists(String),

    #[error("username {0} is reserved")]
    ReservedName(String),

    #[error("username cannot be empty")]
    InvalidUsername,

    #[error("invalid role: {0}")]
    InvalidRole(String),

    #[error("unknown tier: {0}")]
    UnknownTier(String),

    #[error("invalid topic pattern: {0}")]
    InvalidPattern(#[from] PatternError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("password hash error: {0}")]
    Hash(#[from] bcrypt::BcryptError),

    #[error("config error: {0}")]
    Config(String),
}

/// A user defined by static server configuration
///
/// The password arrives pre-hashed; config files never hold plaintext.
#[derive(Debug, Clone)]
pub struct ProvisionedUser {
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub tier: Option<String>,
}

/// A grant defined by static server configuration
#[derive(Debug, Clone)]
pub struct ProvisionedGrant {
    pub username: String,
    pub topic_pattern: String,
    pub permission: Permission,
}

/// Manager construction parameters
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the auth database; must already exist
    pub filename: PathBuf,
    /// Server-wide fallback permission when no grant matches
    pub default_access: Permission,
    /// Cost factor for hashing new passwords
    pub bcrypt_cost: u32,
    /// Flush interval for the usage-stats writer
    pub stats_interval: Duration,
    /// Bound on the in-memory stats queue
    pub stats_queue_capacity: usize,
    /// Reconcile provisioned tiers/users/grants from this config on startup
    pub provision_enabled: bool,
    pub tiers: Vec<Tier>,
    pub users: Vec<ProvisionedUser>,
    pub access: Vec<ProvisionedGrant>,
}

impl Config {
    pub fn new(filename: impl Into<PathBuf>, default_access: Permission) -> Self {
        Self {
            filename: filename.into(),
            default_access,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            stats_interval: stats::DEFAULT_FLUSH_INTERVAL,
            stats_queue_capacity: stats::DEFAULT_QUEUE_CAPACITY,
            provision_enabled: false,
            tiers: Vec::new(),
            users: Vec::new(),
            access: Vec::new(),
        }
    }
}

/// Access-control core: user registry, grant store, permission resolution
/// and usage accounting
pub struct Manager {
    store: SqliteStore,
    default_access: Permission,
    bcrypt_cost: u32,
    stats: StatsQueue,
    writer: StatsWriter,
    /// Serializes administrative read-modify-write sequences; hot-path
    /// reads go straight to the store
    write_lock: Mutex<()>,
}

impl Manager {
    /// Open the auth database and start the stats writer
    ///
    /// Fails fast if the database file is unset or missing; bootstrapping
    /// the file is the collaborator's responsibility. Must be called within
    /// a tokio runtime.
    pub fn new(config: Config) -> Result<Self, AuthError> {
        if config.filename.as_os_str().is_empty() {
            return Err(AuthError::Config(
                "auth database file not set; access control is unconfigured".to_string(),
            ));
        }
        if !config.filename.exists() {
            return Err(AuthError::Config(format!(
                "auth database file {} does not exist; start the server once to create it",
                config.filename.display()
            )));
        }

        let store = SqliteStore::open(&config.filename)?;
        if config.provision_enabled {
            provision(&store, &config)?;
        }

        let (stats, writer) = stats::start(
            store.clone(),
            config.stats_interval,
            config.stats_queue_capacity,
        );

        Ok(Self {
            store,
            default_access: config.default_access,
            bcrypt_cost: config.bcrypt_cost,
            stats,
            writer,
            write_lock: Mutex::new(()),
        })
    }

    // --- resolution (hot path) ---

    /// Compute the effective permission for (identity, topic)
    ///
    /// Precedence: admin override, then the most specific matching grant
    /// among the caller's and the anonymous user's, then the server
    /// default. An identity unknown to the registry is treated as
    /// anonymous; this never returns an error.
    pub fn resolve(&self, identity: &str, topic: &str) -> Permission {
        let name = canonical_name(identity);

        let user = if name == EVERYONE {
            None
        } else {
            match self.store.user(name) {
                Ok(user) => user,
                Err(e) => {
                    warn!(error = %e, user = %name, "Resolve failed to load user, using default access");
                    return self.default_access;
                }
            }
        };

        if let Some(user) = &user {
            if user.is_admin() {
                return Permission::ReadWrite;
            }
        }

        // (literal overlap, exact over wildcard, caller over anonymous, recency)
        let mut best: Option<((usize, bool, bool, i64), Permission)> = None;
        let mut consider = |rows: &[GrantRow], caller_owned: bool| {
            for row in rows {
                let Ok(pattern) = TopicPattern::parse(&row.topic_pattern) else {
                    continue;
                };
                if !pattern.matches(topic) {
                    continue;
                }
                let key = (
                    pattern.literal_overlap(topic),
                    !pattern.is_wildcard(),
                    caller_owned,
                    row.seq,
                );
                if best.as_ref().map_or(true, |(b, _)| key > *b) {
                    best = Some((key, row.permission));
                }
            }
        };

        if let Some(user) = &user {
            match self.store.grant_rows(&user.name) {
                Ok(rows) => consider(&rows, true),
                Err(e) => {
                    warn!(error = %e, user = %user.name, "Resolve failed to load grants, using default access");
                    return self.default_access;
                }
            }
        }
        match self.store.grant_rows(EVERYONE) {
            Ok(rows) => consider(&rows, false),
            Err(e) => {
                warn!(error = %e, "Resolve failed to load anonymous grants, using default access");
                return self.default_access;
            }
        }

        best.map(|(_, permission)| permission)
            .unwrap_or(self.default_access)
    }

    /// The server-wide fallback permission
    pub fn default_access(&self) -> Permission {
        self.default_access
    }

    // --- user registry ---

    /// Add a user; the password is hashed unless `already_hashed` is set
    /// (scripted provisioning with a precomputed hash)
    pub fn add_user(
        &self,
        name: &str,
        password: &str,
        role: Role,
        already_hashed: bool,
    ) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock();
        check_username(name)?;
        if self.store.user(name)?.is_some() {
            return Err(AuthError::UserExists(name.to_string()));
        }
        let hash = if already_hashed {
            password.to_string()
        } else {
            hash_password(password, self.bcrypt_cost)?
        };
        self.store.insert_user(name, &hash, role, false)?;
        info!(user = %name, role = %role, "Added user");
        Ok(())
    }

    /// Remove a user together with all of their grants
    pub fn remove_user(&self, name: &str) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock();
        check_username(name)?;
        if !self.store.delete_user(name)? {
            return Err(AuthError::UserNotFound(name.to_string()));
        }
        info!(user = %name, "Removed user");
        Ok(())
    }

    pub fn change_password(
        &self,
        name: &str,
        password: &str,
        already_hashed: bool,
    ) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock();
        check_username(name)?;
        let hash = if already_hashed {
            password.to_string()
        } else {
            hash_password(password, self.bcrypt_cost)?
        };
        if !self.store.update_password(name, &hash)? {
            return Err(AuthError::UserNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Change a user's role
    ///
    /// Promoting to admin keeps existing grants in place; they become inert
    /// through the admin short-circuit in [`Manager::resolve`] and regain
    /// effect if the user is later demoted.
    pub fn change_role(&self, name: &str, role: Role) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock();
        check_username(name)?;
        if !self.store.update_role(name, role)? {
            return Err(AuthError::UserNotFound(name.to_string()));
        }
        info!(user = %name, role = %role, "Changed role");
        Ok(())
    }

    pub fn change_tier(&self, name: &str, tier_code: &str) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock();
        check_username(name)?;
        if self.store.tier(tier_code)?.is_none() {
            return Err(AuthError::UnknownTier(tier_code.to_string()));
        }
        if !self.store.update_tier(name, Some(tier_code))? {
            return Err(AuthError::UserNotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn reset_tier(&self, name: &str) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock();
        check_username(name)?;
        if !self.store.update_tier(name, None)? {
            return Err(AuthError::UserNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Look up a single user; the anonymous name yields a synthetic record
    pub fn user(&self, name: &str) -> Result<User, AuthError> {
        let name = canonical_name(name);
        if name == EVERYONE {
            return Ok(User::everyone());
        }
        self.store
            .user(name)?
            .ok_or_else(|| AuthError::UserNotFound(name.to_string()))
    }

    /// All users, name-ordered, with the anonymous user appended last
    pub fn users(&self) -> Result<Vec<User>, AuthError> {
        let mut users = self.store.users()?;
        users.push(User::everyone());
        Ok(users)
    }

    // --- tier registry ---

    pub fn add_tier(&self, tier: Tier) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock();
        if tier.code.is_empty() {
            return Err(AuthError::Config("tier code cannot be empty".to_string()));
        }
        self.store.upsert_tier(&tier)?;
        Ok(())
    }

    pub fn tier(&self, code: &str) -> Result<Tier, AuthError> {
        self.store
            .tier(code)?
            .ok_or_else(|| AuthError::UnknownTier(code.to_string()))
    }

    pub fn tiers(&self) -> Result<Vec<Tier>, AuthError> {
        Ok(self.store.tiers()?)
    }

    // --- grant store ---

    /// Upsert a grant for (user, topic pattern)
    ///
    /// An explicit deny-all is recorded like any other permission; it
    /// overrides the server default, which having no entry does not.
    /// Grants stored for an admin are accepted but inert.
    pub fn allow_access(
        &self,
        username: &str,
        topic_pattern: &str,
        permission: Permission,
    ) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock();
        let name = canonical_name(username);
        if name.is_empty() {
            return Err(AuthError::InvalidUsername);
        }
        let pattern = TopicPattern::parse(topic_pattern)?;
        if name != EVERYONE && self.store.user(name)?.is_none() {
            return Err(AuthError::UserNotFound(name.to_string()));
        }
        self.store
            .upsert_grant(name, &pattern.to_string(), permission, false)?;
        Ok(())
    }

    /// Clear non-provisioned grants at one of three granularities:
    /// everything (empty username), one user (empty pattern), or one
    /// (user, pattern) entry. Provisioned grants stay; they are owned by
    /// the server configuration.
    pub fn reset_access(&self, username: &str, topic_pattern: &str) -> Result<(), AuthError> {
        let _guard = self.write_lock.lock();
        let name = canonical_name(username);
        let removed = if name.is_empty() {
            self.store.reset_all()?
        } else if topic_pattern.is_empty() {
            self.store.reset_user(name)?
        } else {
            self.store.reset_user_topic(name, topic_pattern)?
        };
        info!(user = %name, topic = %topic_pattern, removed, "Reset access");
        Ok(())
    }

    /// All grants owned by a user, in stable pattern order
    pub fn grants(&self, username: &str) -> Result<Vec<Grant>, AuthError> {
        Ok(self.store.grants(canonical_name(username))?)
    }

    // --- usage stats ---

    /// Record one published message for an identity; best-effort and
    /// non-blocking, dropped (and counted) if the queue is full
    pub fn record_message(&self, identity: &str) {
        self.stats.enqueue(StatsEvent {
            username: canonical_name(identity).to_string(),
            messages: 1,
        });
    }

    /// Events discarded because the stats queue was full
    pub fn stats_dropped_events(&self) -> u64 {
        self.stats.dropped_events()
    }

    /// Stats batches lost to storage write failures
    pub fn stats_flush_failures(&self) -> u64 {
        self.stats.flush_failures()
    }

    /// Stop the stats writer after one final drain-and-flush
    pub async fn shutdown(self) {
        self.writer.shutdown().await;
    }
}

/// Parse a role string at the administrative boundary
pub fn parse_role(s: &str) -> Result<Role, AuthError> {
    Role::parse(s).ok_or_else(|| AuthError::InvalidRole(s.to_string()))
}

/// Map the CLI spelling of the anonymous user to its stored name
fn canonical_name(name: &str) -> &str {
    if name == EVERYONE_ALIAS {
        EVERYONE
    } else {
        name
    }
}

/// Reject names that can never belong to a managed user: the anonymous
/// sentinel and the empty string, which `reset_access` reads as "all users"
fn check_username(name: &str) -> Result<(), AuthError> {
    if name.is_empty() {
        return Err(AuthError::InvalidUsername);
    }
    if name == EVERYONE || name == EVERYONE_ALIAS {
        return Err(AuthError::ReservedName(name.to_string()));
    }
    Ok(())
}

/// Replace provisioned tiers, users and grants from the server config
///
/// Provisioned rows are dropped and recreated wholesale, so the database
/// never drifts from the authoritative config source. Dynamic rows are
/// untouched.
fn provision(store: &SqliteStore, config: &Config) -> Result<(), AuthError> {
    store.drop_provisioned()?;

    for tier in &config.tiers {
        store.upsert_tier(tier)?;
    }

    for user in &config.users {
        check_username(&user.name)?;
        if let Some(code) = &user.tier {
            if store.tier(code)?.is_none() {
                return Err(AuthError::UnknownTier(code.clone()));
            }
        }
        store.upsert_provisioned_user(
            &user.name,
            &user.password_hash,
            user.role,
            user.tier.as_deref(),
        )?;
    }

    for grant in &config.access {
        let name = canonical_name(&grant.username);
        let pattern = TopicPattern::parse(&grant.topic_pattern)?;
        if name != EVERYONE && store.user(name)?.is_none() {
            return Err(AuthError::UserNotFound(name.to_string()));
        }
        store.upsert_grant(name, &pattern.to_string(), grant.permission, true)?;
    }

    info!(
        tiers = config.tiers.len(),
        users = config.users.len(),
        grants = config.access.len(),
        "Provisioned entities from server config"
    );
    Ok(())
}
