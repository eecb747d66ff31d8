//! Permission and role types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Effective access to a topic
///
/// There is no total order between values; each one independently answers
/// "can read" and "can write".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Permission {
    /// Subscribe and publish
    ReadWrite,
    /// Subscribe only
    ReadOnly,
    /// Publish only
    WriteOnly,
    /// Neither; an explicit deny overrides a broader default
    DenyAll,
}

impl Permission {
    /// Parse from string, including the short aliases
    pub fn parse(s: &str) -> Option<Permission> {
        match s.to_lowercase().as_str() {
            "read-write" | "rw" => Some(Permission::ReadWrite),
            "read-only" | "read" | "ro" => Some(Permission::ReadOnly),
            "write-only" | "write" | "wo" => Some(Permission::WriteOnly),
            "deny-all" | "deny" | "none" => Some(Permission::DenyAll),
            _ => None,
        }
    }

    /// Check if subscribing is allowed
    pub fn is_read(&self) -> bool {
        matches!(self, Permission::ReadWrite | Permission::ReadOnly)
    }

    /// Check if publishing is allowed
    pub fn is_write(&self) -> bool {
        matches!(self, Permission::ReadWrite | Permission::WriteOnly)
    }

    /// Check if both are allowed
    pub fn is_read_write(&self) -> bool {
        matches!(self, Permission::ReadWrite)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::ReadWrite => write!(f, "read-write"),
            Permission::ReadOnly => write!(f, "read-only"),
            Permission::WriteOnly => write!(f, "write-only"),
            Permission::DenyAll => write!(f, "deny-all"),
        }
    }
}

/// Role of a registered user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Read-write access to all topics, grants are inert
    Admin,
    /// Access governed by grants and the server default
    Regular,
}

impl Role {
    /// Parse from string ("user" is the wire spelling for Regular)
    pub fn parse(s: &str) -> Option<Role> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "user" | "regular" => Some(Role::Regular),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Regular => write!(f, "user"),
        }
    }
}
