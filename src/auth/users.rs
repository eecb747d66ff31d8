//! User, tier and grant records

use crate::auth::{Permission, Role};
use serde::{Deserialize, Serialize};

/// Reserved name for the anonymous user
///
/// Grants recorded for this name apply to every caller (shadowed by
/// caller-specific grants). It can never be created or removed through
/// user management, and never holds a role other than regular.
pub const EVERYONE: &str = "*";

/// The CLI-facing spelling of [`EVERYONE`], reserved as well
pub const EVERYONE_ALIAS: &str = "everyone";

/// A registered user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    /// Opaque one-way hash of the password, never the password itself
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: Role,
    /// Assigned tier, if any
    pub tier: Option<Tier>,
    /// True if defined by static server configuration
    pub provisioned: bool,
    pub stats: UserStats,
}

impl User {
    /// The synthetic record representing anonymous callers
    pub fn everyone() -> Self {
        Self {
            name: EVERYONE.to_string(),
            password_hash: String::new(),
            role: Role::Regular,
            tier: None,
            provisioned: false,
            stats: UserStats::default(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Usage counters for a user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserStats {
    /// Messages published
    pub messages: u64,
}

/// A named bundle of usage limits assignable to a user
///
/// Limit enforcement happens elsewhere; only the assignment relationship
/// is managed here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    /// Unique tier code, e.g. "pro"
    pub code: String,
    pub name: String,
    /// Message quota per accounting period
    pub message_limit: u64,
}

/// A stored access rule: one topic pattern mapped to a permission
///
/// The owning user is implied by the query that returned the grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub topic_pattern: String,
    pub permission: Permission,
    /// True if defined by static server configuration
    pub provisioned: bool,
}
