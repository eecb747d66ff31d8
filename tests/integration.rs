//! End-to-end tests for the access-control manager
//!
//! Every test opens a fresh database file in a temp directory, the way the
//! server bootstrap would have left one behind.

use gatehouse::{
    AuthError, Config, Manager, Permission, ProvisionedGrant, ProvisionedUser, Role, Tier,
    EVERYONE,
};
use std::time::Duration;

fn fresh_config(dir: &tempfile::TempDir) -> Config {
    let path = dir.path().join("auth.db");
    std::fs::File::create(&path).unwrap();
    Config::new(path, Permission::DenyAll)
}

fn new_manager(dir: &tempfile::TempDir) -> Manager {
    Manager::new(fresh_config(dir)).unwrap()
}

// Bcrypt at the default cost is slow; scripted hashes keep tests fast
fn add_user(manager: &Manager, name: &str, role: Role) {
    manager.add_user(name, "$2a$10$precomputed", role, true).unwrap();
}

#[tokio::test]
async fn test_construction_requires_existing_file() {
    let dir = tempfile::tempdir().unwrap();

    let missing = Config::new(dir.path().join("nope.db"), Permission::ReadWrite);
    assert!(matches!(Manager::new(missing), Err(AuthError::Config(_))));

    let unset = Config::new("", Permission::ReadWrite);
    assert!(matches!(Manager::new(unset), Err(AuthError::Config(_))));
}

#[tokio::test]
async fn test_admin_override_ignores_grants() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    add_user(&manager, "root", Role::Admin);
    // Grants recorded for an admin are accepted but inert
    manager.allow_access("root", "secret", Permission::DenyAll).unwrap();

    assert_eq!(manager.resolve("root", "secret"), Permission::ReadWrite);
    assert_eq!(manager.resolve("root", "anything"), Permission::ReadWrite);
}

#[tokio::test]
async fn test_grant_governs_matching_topics() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    add_user(&manager, "phil", Role::Regular);
    manager.allow_access("phil", "alerts*", Permission::ReadOnly).unwrap();

    assert_eq!(manager.resolve("phil", "alerts"), Permission::ReadOnly);
    assert_eq!(manager.resolve("phil", "alerts_prod"), Permission::ReadOnly);
    // Non-matching topic falls through to the server default
    assert_eq!(manager.resolve("phil", "other"), Permission::DenyAll);
}

#[tokio::test]
async fn test_exact_match_beats_wildcard() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    add_user(&manager, "phil", Role::Regular);
    manager.allow_access("phil", "up*", Permission::ReadOnly).unwrap();
    manager.allow_access("phil", "upload", Permission::WriteOnly).unwrap();

    assert_eq!(manager.resolve("phil", "upload"), Permission::WriteOnly);
    assert_eq!(manager.resolve("phil", "uploads"), Permission::ReadOnly);
}

#[tokio::test]
async fn test_longer_prefix_wins() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    add_user(&manager, "phil", Role::Regular);
    manager.allow_access("phil", "up*", Permission::DenyAll).unwrap();
    manager.allow_access("phil", "upload*", Permission::ReadWrite).unwrap();

    assert_eq!(manager.resolve("phil", "uploads"), Permission::ReadWrite);
    assert_eq!(manager.resolve("phil", "uptime"), Permission::DenyAll);
}

#[tokio::test]
async fn test_explicit_deny_overrides_permissive_default() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fresh_config(&dir);
    config.default_access = Permission::ReadWrite;
    let manager = Manager::new(config).unwrap();

    add_user(&manager, "phil", Role::Regular);
    manager.allow_access("phil", "private", Permission::DenyAll).unwrap();

    assert_eq!(manager.default_access(), Permission::ReadWrite);
    assert_eq!(manager.resolve("phil", "private"), Permission::DenyAll);
    // No entry at all still falls through to the default
    assert_eq!(manager.resolve("phil", "public"), Permission::ReadWrite);
}

#[tokio::test]
async fn test_anonymous_grants_apply_to_everyone() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    add_user(&manager, "phil", Role::Regular);
    manager.allow_access("everyone", "announce*", Permission::ReadOnly).unwrap();

    // Registered caller, anonymous caller, and unknown identity all match
    assert_eq!(manager.resolve("phil", "announcements"), Permission::ReadOnly);
    assert_eq!(manager.resolve(EVERYONE, "announcements"), Permission::ReadOnly);
    assert_eq!(manager.resolve("stranger", "announcements"), Permission::ReadOnly);

    // A caller-specific grant on the same topic shadows the anonymous one
    manager.allow_access("phil", "announcements", Permission::ReadWrite).unwrap();
    assert_eq!(manager.resolve("phil", "announcements"), Permission::ReadWrite);
    assert_eq!(manager.resolve("stranger", "announcements"), Permission::ReadOnly);
}

#[tokio::test]
async fn test_unknown_identity_never_errors() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    assert_eq!(manager.resolve("ghost", "topic"), Permission::DenyAll);
    assert_eq!(manager.resolve("", "topic"), Permission::DenyAll);
}

#[tokio::test]
async fn test_last_write_wins_per_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    add_user(&manager, "phil", Role::Regular);
    manager.allow_access("phil", "topic", Permission::ReadOnly).unwrap();
    manager.allow_access("phil", "topic", Permission::WriteOnly).unwrap();

    let grants = manager.grants("phil").unwrap();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].permission, Permission::WriteOnly);
    assert_eq!(manager.resolve("phil", "topic"), Permission::WriteOnly);
}

#[tokio::test]
async fn test_reset_access_granularities() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    add_user(&manager, "phil", Role::Regular);
    add_user(&manager, "anna", Role::Regular);
    manager.allow_access("phil", "a", Permission::ReadOnly).unwrap();
    manager.allow_access("phil", "b", Permission::ReadOnly).unwrap();
    manager.allow_access("anna", "c", Permission::ReadOnly).unwrap();

    // One (user, pattern) entry
    manager.reset_access("phil", "a").unwrap();
    assert_eq!(manager.grants("phil").unwrap().len(), 1);
    assert_eq!(manager.resolve("phil", "a"), Permission::DenyAll);

    // One user
    manager.reset_access("phil", "").unwrap();
    assert!(manager.grants("phil").unwrap().is_empty());
    assert_eq!(manager.grants("anna").unwrap().len(), 1);

    // Everything
    manager.reset_access("", "").unwrap();
    assert!(manager.grants("anna").unwrap().is_empty());
    assert_eq!(manager.resolve("anna", "c"), Permission::DenyAll);
}

#[tokio::test]
async fn test_remove_user_cascades() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    add_user(&manager, "phil", Role::Regular);
    manager.allow_access("phil", "topic", Permission::ReadWrite).unwrap();

    manager.remove_user("phil").unwrap();
    assert!(manager.grants("phil").unwrap().is_empty());
    assert!(matches!(
        manager.allow_access("phil", "topic", Permission::ReadOnly),
        Err(AuthError::UserNotFound(_))
    ));
    assert!(matches!(
        manager.user("phil"),
        Err(AuthError::UserNotFound(_))
    ));
}

#[tokio::test]
async fn test_user_management_errors() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    add_user(&manager, "phil", Role::Regular);
    assert!(matches!(
        manager.add_user("phil", "x", Role::Regular, true),
        Err(AuthError::UserExists(_))
    ));
    for reserved in ["everyone", "*"] {
        assert!(matches!(
            manager.add_user(reserved, "x", Role::Regular, true),
            Err(AuthError::ReservedName(_))
        ));
        assert!(matches!(
            manager.remove_user(reserved),
            Err(AuthError::ReservedName(_))
        ));
    }
    assert!(matches!(
        manager.change_password("ghost", "x", true),
        Err(AuthError::UserNotFound(_))
    ));
    assert!(matches!(
        manager.change_role("ghost", Role::Admin),
        Err(AuthError::UserNotFound(_))
    ));
    assert!(matches!(
        gatehouse::parse_role("root"),
        Err(AuthError::InvalidRole(_))
    ));
    assert!(matches!(
        manager.allow_access("phil", "bad topic", Permission::ReadOnly),
        Err(AuthError::InvalidPattern(_))
    ));
}

#[tokio::test]
async fn test_empty_username_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    // "" is the reset_access "all users" selector; a user by that name
    // could never have its grants reset individually
    assert!(matches!(
        manager.add_user("", "x", Role::Regular, true),
        Err(AuthError::InvalidUsername)
    ));
    assert!(matches!(
        manager.allow_access("", "topic", Permission::ReadOnly),
        Err(AuthError::InvalidUsername)
    ));
    assert_eq!(manager.resolve("", "topic"), Permission::DenyAll);

    // The empty string keeps its one meaning: the global reset selector
    add_user(&manager, "phil", Role::Regular);
    manager.allow_access("phil", "topic", Permission::ReadOnly).unwrap();
    manager.reset_access("", "").unwrap();
    assert!(manager.grants("phil").unwrap().is_empty());
}

#[tokio::test]
async fn test_role_change_suppresses_without_deleting() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    add_user(&manager, "phil", Role::Regular);
    manager.allow_access("phil", "topic", Permission::ReadOnly).unwrap();

    manager.change_role("phil", Role::Admin).unwrap();
    assert_eq!(manager.resolve("phil", "topic"), Permission::ReadWrite);
    // Still stored, just inert
    assert_eq!(manager.grants("phil").unwrap().len(), 1);

    manager.change_role("phil", Role::Regular).unwrap();
    assert_eq!(manager.resolve("phil", "topic"), Permission::ReadOnly);
}

#[tokio::test]
async fn test_tier_assignment() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    add_user(&manager, "phil", Role::Regular);
    assert!(matches!(
        manager.change_tier("phil", "pro"),
        Err(AuthError::UnknownTier(_))
    ));

    manager.add_tier(Tier {
        code: "pro".to_string(),
        name: "Pro".to_string(),
        message_limit: 5000,
    }).unwrap();
    manager.change_tier("phil", "pro").unwrap();
    assert_eq!(manager.user("phil").unwrap().tier.unwrap().code, "pro");

    manager.reset_tier("phil").unwrap();
    assert!(manager.user("phil").unwrap().tier.is_none());
}

#[tokio::test]
async fn test_users_includes_anonymous_sentinel() {
    let dir = tempfile::tempdir().unwrap();
    let manager = new_manager(&dir);

    add_user(&manager, "phil", Role::Regular);
    let users = manager.users().unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users.last().unwrap().name, EVERYONE);

    let anon = manager.user("everyone").unwrap();
    assert_eq!(anon.name, EVERYONE);
    assert_eq!(anon.role, Role::Regular);
}

#[tokio::test]
async fn test_provisioning_reconciles_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fresh_config(&dir);
    config.provision_enabled = true;
    config.tiers = vec![Tier {
        code: "pro".to_string(),
        name: "Pro".to_string(),
        message_limit: 5000,
    }];
    config.users = vec![ProvisionedUser {
        name: "backup".to_string(),
        password_hash: "$2a$10$precomputed".to_string(),
        role: Role::Regular,
        tier: Some("pro".to_string()),
    }];
    config.access = vec![ProvisionedGrant {
        username: "backup".to_string(),
        topic_pattern: "backups*".to_string(),
        permission: Permission::WriteOnly,
    }];

    let manager = Manager::new(config.clone()).unwrap();
    let backup = manager.user("backup").unwrap();
    assert!(backup.provisioned);
    assert_eq!(backup.tier.unwrap().code, "pro");
    assert_eq!(manager.resolve("backup", "backups_daily"), Permission::WriteOnly);

    // Reset never touches provisioned grants
    manager.reset_access("", "").unwrap();
    let grants = manager.grants("backup").unwrap();
    assert_eq!(grants.len(), 1);
    assert!(grants[0].provisioned);
    assert_eq!(manager.resolve("backup", "backups_daily"), Permission::WriteOnly);

    // A dynamic overwrite survives only until the next reload
    manager.allow_access("backup", "backups*", Permission::DenyAll).unwrap();
    assert_eq!(manager.resolve("backup", "backups_daily"), Permission::DenyAll);
    manager.shutdown().await;

    let manager = Manager::new(config).unwrap();
    assert_eq!(manager.resolve("backup", "backups_daily"), Permission::WriteOnly);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_usage_stats_flushed_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fresh_config(&dir);
    // Long interval so only the shutdown flush writes
    config.stats_interval = Duration::from_secs(3600);
    let manager = Manager::new(config).unwrap();

    add_user(&manager, "phil", Role::Regular);
    for _ in 0..4 {
        manager.record_message("phil");
    }
    assert_eq!(manager.stats_dropped_events(), 0);

    let store_path = dir.path().join("auth.db");
    manager.shutdown().await;

    // Reopen and observe the committed counters
    let manager = Manager::new(Config::new(store_path, Permission::DenyAll)).unwrap();
    assert_eq!(manager.user("phil").unwrap().stats.messages, 4);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_dynamic_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = fresh_config(&dir);

    let manager = Manager::new(config.clone()).unwrap();
    add_user(&manager, "phil", Role::Regular);
    manager.allow_access("phil", "topic", Permission::ReadOnly).unwrap();
    manager.shutdown().await;

    let manager = Manager::new(config).unwrap();
    assert_eq!(manager.resolve("phil", "topic"), Permission::ReadOnly);
    assert_eq!(manager.grants("phil").unwrap().len(), 1);
}
