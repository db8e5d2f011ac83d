//! Shared test utilities for core module tests
//!
//! This module is only compiled in test mode.

use crate::core::rule::{Action, Direction, Protocol, Rule};
use crate::core::store::MemoryStore;
use crate::core::ufw::UfwCli;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

/// Mutex for tests that need exclusive access to environment variables.
///
/// Use this when your test needs to:
/// 1. Temporarily change env vars to different values
/// 2. Restore env vars after the test
/// 3. Test behavior when env vars are absent
///
/// Tests that run ufw should use [`mock_ufw`], which takes this lock too.
///
/// # Example
///
/// ```ignore
/// let _guard = ENV_VAR_MUTEX.lock().unwrap();
/// unsafe {
///     std::env::set_var("UFWFE_ELEVATION_METHOD", "sudo");
/// }
/// // ... test with custom env state ...
/// unsafe {
///     std::env::remove_var("UFWFE_ELEVATION_METHOD");
/// }
/// ```
pub static ENV_VAR_MUTEX: Mutex<()> = Mutex::new(());

/// Stand-in for `ufw`: echoes its arguments, reports a version and fails on
/// `delete 99`.
const MOCK_UFW_SCRIPT: &str = r#"#!/bin/sh
case "$1" in
    version)
        echo "ufw ${UFWFE_MOCK_VERSION:-0.36.2}"
        echo "Copyright 2008-2023 Canonical Ltd."
        ;;
    *)
        if [ "$1" = "--force" ] && [ "$2" = "delete" ] && [ "$3" = "99" ]; then
            echo "ERROR: Could not delete non-existent rule '99'" >&2
            exit 1
        fi
        echo "mock: $*"
        ;;
esac
"#;

static MOCK_UFW_PATH: OnceLock<PathBuf> = OnceLock::new();

fn mock_ufw_path() -> &'static Path {
    MOCK_UFW_PATH.get_or_init(|| {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("ufwfe-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).expect("create mock dir");
        let staging = dir.join("ufw.tmp");
        let path = dir.join("ufw");
        std::fs::write(&staging, MOCK_UFW_SCRIPT).expect("write mock ufw");
        std::fs::set_permissions(&staging, std::fs::Permissions::from_mode(0o755))
            .expect("chmod mock ufw");
        std::fs::rename(&staging, &path).expect("install mock ufw");
        path
    })
}

/// Points ufw operations at the mock script and bypasses elevation.
///
/// Holds [`ENV_VAR_MUTEX`] for as long as the returned guard lives.
///
/// # Example
///
/// ```ignore
/// let _mock = mock_ufw();
/// let mut cli = UfwCli::new("/etc/ufw", "/etc/default/ufw", "/etc/ufw/applications.d");
/// assert_eq!(cli.delete(3).unwrap(), "mock: --force delete 3");
/// ```
pub fn mock_ufw() -> MutexGuard<'static, ()> {
    let guard = ENV_VAR_MUTEX.lock().unwrap_or_else(PoisonError::into_inner);
    let path = mock_ufw_path();
    // SAFETY: env access is serialized by ENV_VAR_MUTEX
    unsafe {
        std::env::set_var("UFWFE_TEST_NO_ELEVATION", "1");
        std::env::set_var("UFWFE_UFW_COMMAND", path);
        std::env::remove_var("UFWFE_ELEVATION_METHOD");
    }
    guard
}

/// Lays out a ufw configuration tree in `dir` and returns an adapter for it.
///
/// Writes `user.rules`, `user6.rules`, an enabled `ufw.conf` with low
/// logging, a stock defaults file and an empty `applications.d`.
pub fn write_ufw_dir(dir: &Path, user_rules: &str, user6_rules: &str) -> UfwCli {
    std::fs::write(dir.join("user.rules"), user_rules).expect("write user.rules");
    std::fs::write(dir.join("user6.rules"), user6_rules).expect("write user6.rules");
    std::fs::write(dir.join("ufw.conf"), "ENABLED=yes\nLOGLEVEL=low\n").expect("write ufw.conf");
    std::fs::write(
        dir.join("default_ufw"),
        "# /etc/default/ufw\nIPV6=yes\nDEFAULT_INPUT_POLICY=\"DROP\"\n\
         DEFAULT_OUTPUT_POLICY=\"ACCEPT\"\nDEFAULT_FORWARD_POLICY=\"DROP\"\n\
         IPT_MODULES=\"nf_conntrack_ftp nf_nat_ftp\"\n",
    )
    .expect("write defaults");
    std::fs::create_dir_all(dir.join("applications.d")).expect("create applications.d");

    UfwCli::new(dir, dir.join("default_ufw"), dir.join("applications.d"))
}

/// Inbound tcp rule for one destination port.
pub fn port_rule(action: Action, port: &str) -> Rule {
    Rule::new(action)
        .with_destination_port(port)
        .with_protocol(Protocol::Tcp)
}

/// Inbound rule for a destination application profile.
pub fn app_rule(app: &str) -> Rule {
    Rule::new(Action::Allow).with_destination_app(app)
}

/// Five distinct rules, ports 21..=25.
pub fn five_rules() -> Vec<Rule> {
    (21..=25)
        .map(|port| port_rule(Action::Allow, &port.to_string()))
        .collect()
}

/// A store holding [`five_rules`].
pub fn store_with_five_rules() -> MemoryStore {
    MemoryStore::new().with_rules(five_rules())
}

/// A mixed set covering every grammar branch the script codec supports.
pub fn varied_rules() -> Vec<Rule> {
    vec![
        port_rule(Action::Allow, "22"),
        Rule::new(Action::Deny)
            .with_source("10.0.0.0/8")
            .with_interface_in("eth0"),
        app_rule("Apache Full"),
        Rule::new(Action::Limit)
            .with_source("192.168.1.0/24")
            .with_destination_port("22")
            .with_protocol(Protocol::Tcp),
        Rule::new(Action::Reject)
            .with_direction(Direction::Out)
            .with_destination("2001:db8::/32")
            .with_destination_port("6000:6007")
            .with_protocol(Protocol::Udp),
    ]
}
