//! Gatehouse - access control core for a multi-tenant pub/sub notification service
//!
//! Decides, for any (identity, topic) pair, whether reading and/or writing is
//! permitted, and persists the users, grants, tiers and usage counters that
//! feed that decision. Transport and CLI surfaces live elsewhere; they only
//! call [`Manager`] operations and render the results.

pub mod auth;
pub mod manager;
pub mod stats;
pub mod store;
pub mod topics;

pub use auth::{Grant, Permission, Role, Tier, User, UserStats, EVERYONE};
pub use manager::{parse_role, AuthError, Config, Manager, ProvisionedGrant, ProvisionedUser};
pub use topics::{PatternError, TopicPattern};
