//! Access control vocabulary
//!
//! Permissions:
//! - `read-write`: subscribe and publish
//! - `read-only`: subscribe only
//! - `write-only`: publish only
//! - `deny-all`: neither (an explicit deny entry, distinct from no entry)
//!
//! Roles:
//! - `admin`: read-write access to every topic, grants are ignored
//! - `user`: only what grants and the server default allow

mod password;
mod permissions;
mod users;

pub use password::{constant_time_eq, hash_password, DEFAULT_BCRYPT_COST};
pub use permissions::{Permission, Role};
pub use users::{Grant, Tier, User, UserStats, EVERYONE, EVERYONE_ALIAS};
