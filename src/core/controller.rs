//! Ordered rule list management
//!
//! [`RuleListController`] keeps the store's ordered rule list consistent across
//! interactive edits. The store renumbers every rule after each insert or
//! delete, so `update` and `move_rule` are delete-then-insert sequences and are
//! not atomic: when the insert fails after the delete succeeded the old rule is
//! gone, and the failure is reported as [`Error::Incomplete`].
//!
//! Callers are expected to refuse mutations while the firewall is disabled
//! (see `require_active_for_edits` in the configuration).

use crate::core::address::resolve_ip_version;
use crate::core::error::{Error, Result};
use crate::core::events::ConnectionEvent;
use crate::core::normalize::{DisplayRuleRow, fixup_for_storage};
use crate::core::rule::{AppKey, Direction, IpVersion, LogLevel, Policy, Rule};
use crate::core::store::RuleStore;
use crate::validators::validate_rule;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

/// Rules before an explicit insert position whose markers are reset
pub const POSITION_RESET_BEHIND: usize = 1;

/// Rules after an explicit insert position whose markers are reset
pub const POSITION_RESET_AHEAD: usize = 1;

/// Snapshot of the store's rules
///
/// [`RuleListing::iter`] can be called any number of times on the same
/// snapshot; call [`RuleListController::list_rules`] again for a fresh one.
#[derive(Debug, Clone)]
pub struct RuleListing {
    rules: Vec<Rule>,
}

impl RuleListing {
    /// De-duplicated `(store_index, rule)` pairs in store order.
    ///
    /// ufw expands one application rule into several stored rules; all rules
    /// sharing an [`AppKey`] after the first are skipped.
    pub fn iter(&self) -> DedupIter<'_> {
        DedupIter {
            inner: self.rules.iter().enumerate(),
            seen: HashSet::new(),
        }
    }

    /// Number of stored rules, duplicates included
    pub fn store_len(&self) -> usize {
        self.rules.len()
    }
}

impl<'a> IntoIterator for &'a RuleListing {
    type Item = (usize, &'a Rule);
    type IntoIter = DedupIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct DedupIter<'a> {
    inner: std::iter::Enumerate<std::slice::Iter<'a, Rule>>,
    seen: HashSet<AppKey>,
}

impl<'a> Iterator for DedupIter<'a> {
    type Item = (usize, &'a Rule);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (index, rule) = self.inner.next()?;
            if let Some(key) = rule.app_key()
                && !self.seen.insert(key)
            {
                continue;
            }
            return Some((index, rule));
        }
    }
}

/// Summary of the firewall state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallStatus {
    pub enabled: bool,
    pub incoming: Policy,
    pub outgoing: Policy,
    /// Listed (de-duplicated) rules
    pub rule_count: usize,
    pub ipv6: bool,
}

/// Ordered CRUD over a [`RuleStore`]
#[derive(Debug)]
pub struct RuleListController<S: RuleStore> {
    store: S,
}

impl<S: RuleStore> RuleListController<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    /// Fresh de-duplicatable snapshot of the store.
    pub fn list_rules(&self) -> Result<RuleListing> {
        Ok(RuleListing {
            rules: self.store.rules()?,
        })
    }

    /// Numbered display rows for the current rules.
    pub fn display_rows(&self) -> Result<Vec<DisplayRuleRow>> {
        let listing = self.list_rules()?;
        Ok(listing
            .iter()
            .map(|(index, rule)| DisplayRuleRow::new(index, rule))
            .collect())
    }

    /// Validates, normalizes and inserts a rule.
    ///
    /// The IP version is derived from the rule's addresses. A position beyond
    /// the end of the list appends.
    ///
    /// # Errors
    ///
    /// Validation errors leave the store untouched; store errors are returned
    /// verbatim.
    pub fn insert(&mut self, rule: &Rule) -> Result<String> {
        self.insert_with(rule, None)
    }

    /// Like [`Self::insert`] with an explicit IP version.
    pub fn insert_pinned(&mut self, rule: &Rule, ip_version: IpVersion) -> Result<String> {
        self.insert_with(rule, Some(ip_version))
    }

    fn insert_with(&mut self, rule: &Rule, pinned: Option<IpVersion>) -> Result<String> {
        validate_rule(rule)?;
        let ip_version = match pinned {
            Some(v) => v,
            None => resolve_ip_version(&rule.source_address, &rule.destination_address)?,
        };

        let mut fixed = fixup_for_storage(rule);
        // Appends never look at the current list
        if fixed.position > 0 {
            let len = self.store.rules()?.len();
            if fixed.position > len {
                debug!(
                    "Position {} is past the end ({len} rules), appending",
                    fixed.position
                );
                fixed.position = 0;
            }
        }

        let message = self.store.insert(&fixed, ip_version)?;
        info!(
            "Inserted {} rule ({ip_version}) at {}: {message}",
            fixed.action,
            if fixed.position == 0 {
                "end".to_string()
            } else {
                fixed.position.to_string()
            }
        );

        if fixed.position > 0 {
            self.reset_positions_around(fixed.position)?;
        }
        Ok(message)
    }

    /// Clears stale position markers around a rule just inserted at `position`.
    fn reset_positions_around(&mut self, position: usize) -> Result<()> {
        let len = self.store.rules()?.len();
        let first = position.saturating_sub(POSITION_RESET_BEHIND).max(1);
        let last = (position + POSITION_RESET_AHEAD).min(len);
        for p in first..=last {
            self.store.reset_position(p)?;
        }
        Ok(())
    }

    /// Replaces the rule at `position` with `rule`.
    ///
    /// The new rule goes to its own explicit position if set, otherwise to
    /// `position`.
    ///
    /// # Errors
    ///
    /// - Validation errors and a missing rule leave the store untouched.
    /// - A failed delete is returned verbatim.
    /// - A failed insert after the delete is [`Error::Incomplete`]; the old rule
    ///   is not restored.
    pub fn update(&mut self, position: usize, rule: &Rule) -> Result<String> {
        validate_rule(rule)?;
        resolve_ip_version(&rule.source_address, &rule.destination_address)?;
        self.store.rule_at(position)?;

        let deleted = self.store.delete(position)?;
        debug!("Update: deleted rule {position}: {deleted}");

        let replacement = if rule.position > 0 {
            rule.clone()
        } else {
            rule.clone().with_position(position)
        };
        self.insert(&replacement).map_err(|source| Error::Incomplete {
            completed: format!("deleted rule {position}"),
            source: Box::new(source),
        })
    }

    /// Moves the rule at `old` to `new`.
    ///
    /// Returns `Ok(None)` without touching the store when the positions are
    /// equal.
    ///
    /// # Errors
    ///
    /// Same partial-failure reporting as [`Self::update`].
    pub fn move_rule(&mut self, old: usize, new: usize) -> Result<Option<String>> {
        if old == new {
            return Ok(None);
        }

        let moved = self.store.rule_at(old)?.with_position(new);
        validate_rule(&moved)?;
        self.store.delete(old)?;
        self.insert(&moved)
            .map(Some)
            .map_err(|source| Error::Incomplete {
                completed: format!("deleted rule {old} while moving it to {new}"),
                source: Box::new(source),
            })
    }

    /// Deletes the rule at `position` and returns the store's confirmation.
    pub fn delete(&mut self, position: usize) -> Result<String> {
        let message = self.store.delete(position)?;
        info!("Deleted rule {position}: {message}");
        Ok(message)
    }

    /// Appends an allow rule for a logged connection (see [`Rule::from_event`]).
    pub fn allow_event(&mut self, event: &ConnectionEvent) -> Result<String> {
        self.insert(&Rule::from_event(event))
    }

    /// Drops all rules and restores the engine's installed defaults.
    pub fn reset(&mut self) -> Result<String> {
        let message = self.store.reset()?;
        info!("Firewall defaults restored");
        Ok(message)
    }

    /// Disables and re-enables an active firewall.
    ///
    /// Returns `false` without doing anything when the firewall is inactive.
    pub fn reload(&mut self) -> Result<bool> {
        if !self.store.is_enabled()? {
            debug!("Firewall inactive, nothing to reload");
            return Ok(false);
        }
        self.store.set_enabled(false)?;
        self.store.set_enabled(true)?;
        info!("Firewall reloaded");
        Ok(true)
    }

    pub fn is_enabled(&self) -> Result<bool> {
        self.store.is_enabled()
    }

    pub fn set_enabled(&mut self, enabled: bool) -> Result<String> {
        let message = self.store.set_enabled(enabled)?;
        info!("Firewall {}", if enabled { "enabled" } else { "disabled" });
        Ok(message)
    }

    pub fn set_default_policy(&mut self, direction: Direction, policy: Policy) -> Result<String> {
        let message = self.store.set_default_policy(direction, policy)?;
        info!("Default {} policy set to {policy}", direction.policy_name());
        Ok(message)
    }

    pub fn set_log_level(&mut self, level: LogLevel) -> Result<String> {
        let message = self.store.set_log_level(level)?;
        info!("Logging level set to {level}");
        Ok(message)
    }

    /// Writes `IPV6=yes|no` to the engine defaults.
    pub fn set_ipv6(&mut self, enable: bool) -> Result<()> {
        self.store
            .set_default_value("IPV6", if enable { "yes" } else { "no" })?;
        info!("IPv6 {}", if enable { "enabled" } else { "disabled" });
        Ok(())
    }

    /// Adds or removes a netfilter helper module in `IPT_MODULES`.
    ///
    /// The list is stored quoted and space separated. Adding a present module or
    /// removing an absent one still rewrites the value.
    pub fn set_ipt_module(&mut self, name: &str, enable: bool) -> Result<()> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(Error::validation(
                "module",
                format!("invalid module name '{name}'"),
            ));
        }

        let current = self.store.default_value("IPT_MODULES")?.unwrap_or_default();
        let mut modules: Vec<String> = current
            .trim_matches('"')
            .split_whitespace()
            .map(String::from)
            .collect();

        let present = modules.iter().any(|m| m == name);
        if enable && !present {
            modules.push(name.to_string());
        } else if !enable && present {
            modules.retain(|m| m != name);
        }

        let value = format!("\"{}\"", modules.join(" "));
        self.store.set_default_value("IPT_MODULES", &value)?;
        info!("IPT_MODULES set to {value}");
        Ok(())
    }

    /// Modules currently listed in `IPT_MODULES`.
    pub fn ipt_modules(&self) -> Result<Vec<String>> {
        Ok(self
            .store
            .default_value("IPT_MODULES")?
            .unwrap_or_default()
            .trim_matches('"')
            .split_whitespace()
            .map(String::from)
            .collect())
    }

    pub fn status(&self) -> Result<FirewallStatus> {
        let ipv6 = self
            .store
            .default_value("IPV6")?
            .is_none_or(|v| v.trim_matches('"').eq_ignore_ascii_case("yes"));
        Ok(FirewallStatus {
            enabled: self.store.is_enabled()?,
            incoming: self.store.default_policy(Direction::In)?,
            outgoing: self.store.default_policy(Direction::Out)?,
            rule_count: self.list_rules()?.iter().count(),
            ipv6,
        })
    }
}
