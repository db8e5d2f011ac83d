//! Firewall rule data structures
//!
//! A [`Rule`] mirrors one ufw rule: action, direction, protocol, both address
//! sides, both port sides (or application profiles in their place), logging,
//! interfaces and an insert position.
//!
//! Rules are plain values. Everything that adjusts a rule for storage or display
//! (see [`crate::core::normalize`]) returns a new value and never mutates its input.
//!
//! # Example
//!
//! ```
//! use ufwfe::core::rule::{Action, Protocol, Rule};
//!
//! let rule = Rule::new(Action::Allow)
//!     .with_destination_port("22")
//!     .with_protocol(Protocol::Tcp);
//!
//! assert!(!rule.uses_app());
//! assert_eq!(rule.position, 0);
//! ```

use crate::core::events::ConnectionEvent;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Any-sentinel for IPv4 (and the value ufw stores for "anywhere")
pub const ANY_ADDR: &str = "0.0.0.0/0";

/// Any-sentinel for IPv6
pub const ANY_ADDR_V6: &str = "::/0";

/// Port value meaning "every port"
pub const ANY_PORT: &str = "any";

/// Returns `true` if `address` is one of the any-sentinels.
pub fn is_any_address(address: &str) -> bool {
    address.is_empty() || address == ANY_ADDR || address == ANY_ADDR_V6 || address == "any"
}

/// Returns `true` if `port` means "every port".
pub fn is_any_port(port: &str) -> bool {
    port.is_empty() || port == ANY_PORT
}

/// Rule action
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Let the packet through
    #[default]
    #[strum(serialize = "allow")]
    Allow,
    /// Drop the packet silently
    #[strum(serialize = "deny")]
    Deny,
    /// Drop the packet and notify the sender
    #[strum(serialize = "reject")]
    Reject,
    /// Allow, but rate-limit new connections from one source
    #[strum(serialize = "limit")]
    Limit,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Allow => "allow",
            Action::Deny => "deny",
            Action::Reject => "reject",
            Action::Limit => "limit",
        }
    }

    /// Returns display name for listings
    pub const fn display_name(self) -> &'static str {
        match self {
            Action::Allow => "Allow",
            Action::Deny => "Deny",
            Action::Reject => "Reject",
            Action::Limit => "Limit",
        }
    }
}

/// Traffic direction a rule applies to
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    #[strum(serialize = "in")]
    In,
    #[strum(serialize = "out")]
    Out,
}

impl Direction {
    pub const fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }

    pub const fn display_name(self) -> &'static str {
        match self {
            Direction::In => "In",
            Direction::Out => "Out",
        }
    }

    /// Name ufw uses for the default policy of this direction
    pub const fn policy_name(self) -> &'static str {
        match self {
            Direction::In => "incoming",
            Direction::Out => "outgoing",
        }
    }
}

/// Transport protocol of a rule
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Match all protocols
    #[default]
    #[strum(serialize = "any")]
    Any,
    #[strum(serialize = "tcp")]
    Tcp,
    #[strum(serialize = "udp")]
    Udp,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::Any => "any",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

/// Per-rule logging
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
pub enum LogType {
    #[default]
    #[strum(serialize = "none")]
    None,
    /// Log new connections
    #[strum(serialize = "log")]
    Log,
    /// Log every packet
    #[strum(serialize = "log-all")]
    LogAll,
}

impl LogType {
    /// Keyword used on the ufw command line, `None` when logging is off
    pub const fn keyword(self) -> Option<&'static str> {
        match self {
            LogType::None => None,
            LogType::Log => Some("log"),
            LogType::LogAll => Some("log-all"),
        }
    }
}

/// Default policy of a direction
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Policy {
    #[strum(serialize = "allow")]
    Allow,
    #[default]
    #[strum(serialize = "deny")]
    Deny,
    #[strum(serialize = "reject")]
    Reject,
}

impl Policy {
    /// Maps the iptables target stored in `/etc/default/ufw` to a policy.
    pub fn from_target(target: &str) -> Option<Self> {
        match target.trim_matches('"').to_ascii_uppercase().as_str() {
            "ACCEPT" => Some(Policy::Allow),
            "DROP" => Some(Policy::Deny),
            "REJECT" => Some(Policy::Reject),
            _ => None,
        }
    }
}

/// ufw logging level
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[strum(serialize = "off")]
    Off,
    #[default]
    #[strum(serialize = "low")]
    Low,
    #[strum(serialize = "medium")]
    Medium,
    #[strum(serialize = "high")]
    High,
    #[strum(serialize = "full")]
    Full,
}

/// IP versions a rule applies to
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    #[strum(serialize = "both")]
    Both,
    #[strum(serialize = "v4")]
    V4,
    #[strum(serialize = "v6")]
    V6,
}

/// One firewall rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub action: Action,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default = "default_any_addr")]
    pub source_address: String,
    #[serde(default = "default_any_addr")]
    pub destination_address: String,
    #[serde(default = "default_any_port")]
    pub source_port: String,
    #[serde(default = "default_any_port")]
    pub destination_port: String,
    /// Application profile standing in for the source port
    #[serde(default)]
    pub source_app: Option<String>,
    /// Application profile standing in for the destination port
    #[serde(default)]
    pub destination_app: Option<String>,
    #[serde(default)]
    pub log_type: LogType,
    #[serde(default)]
    pub interface_in: Option<String>,
    #[serde(default)]
    pub interface_out: Option<String>,
    /// 1-based insert position, 0 appends
    #[serde(default)]
    pub position: usize,
}

fn default_any_addr() -> String {
    ANY_ADDR.to_string()
}

fn default_any_port() -> String {
    ANY_PORT.to_string()
}

impl Default for Rule {
    fn default() -> Self {
        Self::new(Action::default())
    }
}

impl Rule {
    /// Creates an inbound any-to-any rule with the given action.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            direction: Direction::In,
            protocol: Protocol::Any,
            source_address: default_any_addr(),
            destination_address: default_any_addr(),
            source_port: default_any_port(),
            destination_port: default_any_port(),
            source_app: None,
            destination_app: None,
            log_type: LogType::None,
            interface_in: None,
            interface_out: None,
            position: 0,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_source(mut self, address: impl Into<String>) -> Self {
        self.source_address = address.into();
        self
    }

    pub fn with_destination(mut self, address: impl Into<String>) -> Self {
        self.destination_address = address.into();
        self
    }

    pub fn with_source_port(mut self, port: impl Into<String>) -> Self {
        self.source_port = port.into();
        self
    }

    pub fn with_destination_port(mut self, port: impl Into<String>) -> Self {
        self.destination_port = port.into();
        self
    }

    pub fn with_source_app(mut self, app: impl Into<String>) -> Self {
        self.source_app = Some(app.into());
        self
    }

    pub fn with_destination_app(mut self, app: impl Into<String>) -> Self {
        self.destination_app = Some(app.into());
        self
    }

    pub fn with_log_type(mut self, log_type: LogType) -> Self {
        self.log_type = log_type;
        self
    }

    pub fn with_interface_in(mut self, interface: impl Into<String>) -> Self {
        self.interface_in = Some(interface.into());
        self
    }

    pub fn with_interface_out(mut self, interface: impl Into<String>) -> Self {
        self.interface_out = Some(interface.into());
        self
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = position;
        self
    }

    /// Prefills an inbound allow rule from a logged connection.
    ///
    /// Takes protocol, both addresses and both ports from the event. Ports are
    /// only kept for tcp and udp; other protocols become an any-protocol rule
    /// between the two hosts. The rule appends to the end of the list.
    pub fn from_event(event: &ConnectionEvent) -> Self {
        let protocol = Protocol::from_str(&event.protocol().to_ascii_lowercase())
            .unwrap_or(Protocol::Any);
        let address = |value: &str| {
            if value.is_empty() {
                ANY_ADDR.to_string()
            } else {
                value.to_string()
            }
        };

        let mut rule = Self::new(Action::Allow)
            .with_protocol(protocol)
            .with_source(address(event.source()))
            .with_destination(address(event.destination()));
        if protocol != Protocol::Any {
            if !event.source_port().is_empty() {
                rule.source_port = event.source_port().to_string();
            }
            if !event.destination_port().is_empty() {
                rule.destination_port = event.destination_port().to_string();
            }
        }
        rule
    }

    /// Returns `true` if either side uses an application profile.
    pub fn uses_app(&self) -> bool {
        self.source_app.is_some() || self.destination_app.is_some()
    }

    /// Interface bound in the rule's own direction
    pub fn interface(&self) -> Option<&str> {
        match self.direction {
            Direction::In => self.interface_in.as_deref(),
            Direction::Out => self.interface_out.as_deref(),
        }
    }

    /// Key under which ufw groups the per-port rules it expands one profile rule into.
    ///
    /// Returns `None` for rules without an application profile.
    pub fn app_key(&self) -> Option<AppKey> {
        if !self.uses_app() {
            return None;
        }
        Some(AppKey {
            destination: self
                .destination_app
                .clone()
                .unwrap_or_else(|| self.destination_port.clone()),
            destination_address: self.destination_address.clone(),
            source: self
                .source_app
                .clone()
                .unwrap_or_else(|| self.source_port.clone()),
            source_address: self.source_address.clone(),
            interface: self
                .interface()
                .map(|iface| format!("{}_{iface}", self.direction)),
        })
    }

    /// Compares everything that decides which packets match, ignoring `position`.
    pub fn same_match(&self, other: &Rule) -> bool {
        Rule {
            position: 0,
            ..self.clone()
        } == Rule {
            position: 0,
            ..other.clone()
        }
    }
}

/// Identity of a profile-derived rule for de-duplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppKey {
    pub destination: String,
    pub destination_address: String,
    pub source: String,
    pub source_address: String,
    pub interface: Option<String>,
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.destination, self.destination_address, self.source, self.source_address
        )?;
        if let Some(ref iface) = self.interface {
            write!(f, " {iface}")?;
        }
        Ok(())
    }
}
