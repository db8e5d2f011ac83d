//! Storage fixups and display projection of rules
//!
//! Application-profile shorthand has to be reconciled with the explicit
//! protocol/port fields before a rule reaches the store, and every listing shows
//! a formatted copy of the rule. Both operations take a rule by reference and
//! return a new value.

use crate::core::rule::{Rule, is_any_address, is_any_port};
use serde::Serialize;

/// Returns the rule as it must be handed to the store.
///
/// When either side uses an application profile the protocol becomes `any`
/// (the profile carries its own protocols) and each profile name is copied into
/// the matching port field for consumers that only read ports.
pub fn fixup_for_storage(rule: &Rule) -> Rule {
    let mut fixed = rule.clone();
    if fixed.uses_app() {
        fixed.protocol = crate::core::rule::Protocol::Any;
        if let Some(ref app) = fixed.source_app {
            fixed.source_port.clone_from(app);
        }
        if let Some(ref app) = fixed.destination_app {
            fixed.destination_port.clone_from(app);
        }
    }
    fixed
}

/// Read-only, formatted view of a rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayRule {
    pub action: String,
    pub direction: String,
    pub protocol: String,
    pub source: String,
    pub source_port: String,
    pub destination: String,
    pub destination_port: String,
    pub interface: String,
    pub log: String,
}

/// Formats a rule for listings.
///
/// - action and direction are title-cased (`Allow`, `In`)
/// - protocol is `-` for profile rules, `*` for any, upper-case otherwise
/// - any ports and any-sentinel addresses become `*`
/// - profile names are shown in the port columns
pub fn format_for_display(rule: &Rule) -> DisplayRule {
    let protocol = if rule.uses_app() {
        "-".to_string()
    } else if rule.protocol == crate::core::rule::Protocol::Any {
        "*".to_string()
    } else {
        rule.protocol.as_str().to_uppercase()
    };

    DisplayRule {
        action: rule.action.display_name().to_string(),
        direction: rule.direction.display_name().to_string(),
        protocol,
        source: display_address(&rule.source_address),
        source_port: display_port(rule.source_app.as_deref(), &rule.source_port),
        destination: display_address(&rule.destination_address),
        destination_port: display_port(rule.destination_app.as_deref(), &rule.destination_port),
        interface: rule.interface().unwrap_or("*").to_string(),
        log: rule.log_type.keyword().unwrap_or("").to_string(),
    }
}

fn display_address(address: &str) -> String {
    if is_any_address(address) {
        "*".to_string()
    } else {
        address.to_string()
    }
}

fn display_port(app: Option<&str>, port: &str) -> String {
    match app {
        Some(app) => app.to_string(),
        None if is_any_port(port) => "*".to_string(),
        None => port.to_string(),
    }
}

/// A numbered, de-duplicated listing row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayRuleRow {
    /// 1-based number shown to the user
    pub number: usize,
    /// 0-based index of the underlying rule in the store
    pub store_index: usize,
    pub rule: DisplayRule,
}

impl DisplayRuleRow {
    pub fn new(store_index: usize, rule: &Rule) -> Self {
        Self {
            number: store_index + 1,
            store_index,
            rule: format_for_display(rule),
        }
    }

    /// 1-based store position, suitable for `update`/`move_rule`/`delete`
    pub fn position(&self) -> usize {
        self.store_index + 1
    }
}
