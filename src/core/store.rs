//! Rule store capability contract
//!
//! The firewall engine keeps an ordered rule list and renumbers it after every
//! insert or delete. [`RuleStore`] is the narrow interface the rest of the crate
//! talks to; [`crate::core::ufw::UfwCli`] drives the real `ufw` binary and
//! [`MemoryStore`] keeps everything in process.

use crate::core::error::{Error, Result};
use crate::core::profiles::ApplicationProfile;
use crate::core::rule::{Direction, IpVersion, LogLevel, Policy, Rule};
use crate::core::script::render_command;
use std::collections::BTreeMap;
use tracing::debug;

/// Reports the engine can print (`ufw show <report>`)
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
pub enum Report {
    #[strum(serialize = "raw")]
    Raw,
    #[strum(serialize = "builtins")]
    Builtins,
    #[strum(serialize = "before-rules")]
    BeforeRules,
    #[strum(serialize = "user-rules")]
    UserRules,
    #[strum(serialize = "after-rules")]
    AfterRules,
    #[strum(serialize = "logging-rules")]
    LoggingRules,
    /// Listening sockets and the rules that match them
    #[strum(serialize = "listening")]
    Listening,
    /// Rules as the commands that added them
    #[strum(serialize = "added")]
    Added,
}

/// Operations the firewall engine must provide
///
/// Positions are 1-based. Every mutation returns the engine's confirmation text,
/// which callers surface verbatim.
pub trait RuleStore {
    /// Current rules in store order
    fn rules(&self) -> Result<Vec<Rule>>;

    /// Rule at a 1-based position
    fn rule_at(&self, position: usize) -> Result<Rule> {
        if position == 0 {
            return Err(Error::NoSuchRule(position));
        }
        self.rules()?
            .into_iter()
            .nth(position - 1)
            .ok_or(Error::NoSuchRule(position))
    }

    /// Inserts `rule` at `rule.position`, or appends when it is 0.
    fn insert(&mut self, rule: &Rule, ip_version: IpVersion) -> Result<String>;

    fn delete(&mut self, position: usize) -> Result<String>;

    /// Clears the explicit position marker kept on the rule at `position`.
    fn reset_position(&mut self, position: usize) -> Result<()>;

    fn is_enabled(&self) -> Result<bool>;

    fn set_enabled(&mut self, enabled: bool) -> Result<String>;

    fn default_policy(&self, direction: Direction) -> Result<Policy>;

    fn set_default_policy(&mut self, direction: Direction, policy: Policy) -> Result<String>;

    /// Reads a key of the engine's defaults file (`IPV6`, `IPT_MODULES`, ...)
    fn default_value(&self, key: &str) -> Result<Option<String>>;

    fn set_default_value(&mut self, key: &str, value: &str) -> Result<()>;

    fn set_log_level(&mut self, level: LogLevel) -> Result<String>;

    fn application_profiles(&self) -> Result<Vec<ApplicationProfile>>;

    /// Refreshes the local profile definitions from their upstream sources.
    fn update_profiles(&mut self) -> Result<String>;

    /// Drops every rule and restores the installed defaults. Leaves the
    /// firewall disabled.
    fn reset(&mut self) -> Result<String>;

    fn show_report(&self, report: Report) -> Result<String>;
}

/// One observable mutation of a [`MemoryStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Inserted {
        /// 1-based position the rule landed at
        position: usize,
        ip_version: IpVersion,
    },
    Deleted {
        position: usize,
    },
    PositionReset {
        position: usize,
    },
    Enabled(bool),
    DefaultPolicy {
        direction: Direction,
        policy: Policy,
    },
    DefaultValue {
        key: String,
        value: String,
    },
    LogLevel(LogLevel),
    ProfilesUpdated,
    Reset,
}

/// In-process rule store
///
/// Behaves like ufw where it matters to callers: positions renumber after each
/// mutation, explicit position markers stay on stored rules until reset, and an
/// identical rule is skipped instead of added twice. Every mutation is appended
/// to a change log.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    rules: Vec<Rule>,
    enabled: bool,
    incoming: Policy,
    outgoing: Policy,
    defaults: BTreeMap<String, String>,
    log_level: LogLevel,
    profiles: Vec<ApplicationProfile>,
    changes: Vec<StoreChange>,
    insert_failure: Option<String>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty, enabled store with ufw's stock defaults.
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            enabled: true,
            incoming: Policy::Deny,
            outgoing: Policy::Allow,
            defaults: Self::stock_defaults(),
            log_level: LogLevel::Low,
            profiles: Vec::new(),
            changes: Vec::new(),
            insert_failure: None,
        }
    }

    /// Seeds the store with rules as-is (no duplicate check, no change log).
    pub fn with_rules(mut self, rules: Vec<Rule>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_profiles(mut self, profiles: Vec<ApplicationProfile>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Makes every following insert fail with `message`.
    pub fn fail_inserts_with(&mut self, message: impl Into<String>) {
        self.insert_failure = Some(message.into());
    }

    pub fn clear_failures(&mut self) {
        self.insert_failure = None;
    }

    /// Mutations applied so far, oldest first
    pub fn changes(&self) -> &[StoreChange] {
        &self.changes
    }

    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }

    /// Number of inserts and deletes in the change log
    pub fn mutation_count(&self) -> usize {
        self.changes
            .iter()
            .filter(|c| matches!(c, StoreChange::Inserted { .. } | StoreChange::Deleted { .. }))
            .count()
    }

    fn stock_defaults() -> BTreeMap<String, String> {
        [("IPV6", "yes"), ("IPT_MODULES", "\"nf_conntrack_ftp\"")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn store_error(message: impl Into<String>) -> Error {
        let message = message.into();
        Error::Store {
            stderr: Some(message.clone()),
            message,
            exit_code: Some(1),
        }
    }
}

impl RuleStore for MemoryStore {
    fn rules(&self) -> Result<Vec<Rule>> {
        Ok(self.rules.clone())
    }

    fn insert(&mut self, rule: &Rule, ip_version: IpVersion) -> Result<String> {
        if let Some(ref message) = self.insert_failure {
            return Err(Self::store_error(message.clone()));
        }

        if self.rules.iter().any(|r| r.same_match(rule)) {
            debug!("Skipping duplicate rule");
            return Ok("Skipping adding existing rule".to_string());
        }

        let (index, message) = match rule.position {
            0 => (self.rules.len(), "Rule added"),
            p if p <= self.rules.len() => (p - 1, "Rule inserted"),
            p => return Err(Self::store_error(format!("ERROR: Invalid position '{p}'"))),
        };

        self.rules.insert(index, rule.clone());
        self.changes.push(StoreChange::Inserted {
            position: index + 1,
            ip_version,
        });
        Ok(message.to_string())
    }

    fn delete(&mut self, position: usize) -> Result<String> {
        if position == 0 || position > self.rules.len() {
            return Err(Self::store_error(format!(
                "ERROR: Could not delete non-existent rule '{position}'"
            )));
        }
        self.rules.remove(position - 1);
        self.changes.push(StoreChange::Deleted { position });
        Ok("Rule deleted".to_string())
    }

    fn reset_position(&mut self, position: usize) -> Result<()> {
        let rule = position
            .checked_sub(1)
            .and_then(|i| self.rules.get_mut(i))
            .ok_or(Error::NoSuchRule(position))?;
        rule.position = 0;
        self.changes.push(StoreChange::PositionReset { position });
        Ok(())
    }

    fn is_enabled(&self) -> Result<bool> {
        Ok(self.enabled)
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<String> {
        self.enabled = enabled;
        self.changes.push(StoreChange::Enabled(enabled));
        Ok(if enabled {
            "Firewall is active and enabled on system startup".to_string()
        } else {
            "Firewall stopped and disabled on system startup".to_string()
        })
    }

    fn default_policy(&self, direction: Direction) -> Result<Policy> {
        Ok(match direction {
            Direction::In => self.incoming,
            Direction::Out => self.outgoing,
        })
    }

    fn set_default_policy(&mut self, direction: Direction, policy: Policy) -> Result<String> {
        match direction {
            Direction::In => self.incoming = policy,
            Direction::Out => self.outgoing = policy,
        }
        self.changes
            .push(StoreChange::DefaultPolicy { direction, policy });
        Ok(format!(
            "Default {} policy changed to '{policy}'",
            direction.policy_name()
        ))
    }

    fn default_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.defaults.get(key).cloned())
    }

    fn set_default_value(&mut self, key: &str, value: &str) -> Result<()> {
        self.defaults.insert(key.to_string(), value.to_string());
        self.changes.push(StoreChange::DefaultValue {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    fn set_log_level(&mut self, level: LogLevel) -> Result<String> {
        self.log_level = level;
        self.changes.push(StoreChange::LogLevel(level));
        Ok(if level == LogLevel::Off {
            "Logging disabled".to_string()
        } else {
            "Logging enabled".to_string()
        })
    }

    fn application_profiles(&self) -> Result<Vec<ApplicationProfile>> {
        Ok(self.profiles.clone())
    }

    fn update_profiles(&mut self) -> Result<String> {
        self.changes.push(StoreChange::ProfilesUpdated);
        Ok(String::new())
    }

    fn reset(&mut self) -> Result<String> {
        self.rules.clear();
        self.enabled = false;
        self.incoming = Policy::Deny;
        self.outgoing = Policy::Allow;
        self.defaults = Self::stock_defaults();
        self.changes.push(StoreChange::Reset);
        Ok("Resetting all rules to installed defaults".to_string())
    }

    /// Only `added` has content; there are no chains to dump.
    fn show_report(&self, report: Report) -> Result<String> {
        if report != Report::Added {
            return Ok(String::new());
        }
        let mut lines = vec!["Added user rules (see 'ufw status' for running firewall):".to_string()];
        if self.rules.is_empty() {
            lines.push("(None)".to_string());
        }
        lines.extend(self.rules.iter().map(render_command));
        Ok(lines.join("\n"))
    }
}
