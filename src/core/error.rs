use std::path::PathBuf;
use thiserror::Error;

/// Core error types for ufwfe
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input validation failed
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    /// A rule cannot target an IPv4 host on one side and an IPv6 host on the other
    #[error("Mixed IP versions for 'from' ({source_address}) and 'to' ({destination_address})")]
    MixedAddressFamily {
        source_address: String,
        destination_address: String,
    },

    /// The rule store rejected or failed a mutation
    #[error("ufw error: {message}")]
    Store {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// No rule exists at the requested 1-based position
    #[error("No rule at position {0}")]
    NoSuchRule(usize),

    /// A multi-step mutation failed after an earlier step was already committed.
    ///
    /// The committed step is not rolled back.
    #[error("Operation incomplete: {completed}, then failed: {source}")]
    Incomplete {
        completed: String,
        #[source]
        source: Box<Error>,
    },

    /// None of the configured log paths could be opened
    #[error("No firewall log available (tried: {})", display_paths(.tried))]
    LogUnavailable { tried: Vec<PathBuf> },

    /// The open log handle stopped being usable (rotated, truncated, unreadable)
    #[error("Lost firewall log {path}: {reason}")]
    LogLost { path: PathBuf, reason: String },

    /// The log file watcher could not be set up
    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    /// A line of an import script is not a valid rule command
    #[error("Import error on line {line}: {message}")]
    ImportFormat { line: usize, message: String },

    /// Application profile lookup or parsing failed
    #[error(transparent)]
    Profile(#[from] crate::core::profiles::ProfileError),

    /// Privilege escalation failed
    #[error("Elevation error: {0}")]
    Elevation(String),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a [`Error::Validation`] error.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for errors caused by user input that left the store untouched.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. } | Error::MixedAddressFamily { .. } | Error::ImportFormat { .. }
        )
    }

    /// Returns `true` if part of a multi-step mutation was committed before the failure.
    pub fn is_partial(&self) -> bool {
        matches!(self, Error::Incomplete { .. })
    }

    /// Translates the error into a user-facing message with suggestions.
    pub fn translate(&self) -> ErrorTranslation {
        match self {
            Error::Store { message, stderr, .. } => {
                UfwErrorPattern::match_error(stderr.as_deref().unwrap_or(message))
            }
            Error::Incomplete { completed, source } => {
                let inner = source.translate();
                ErrorTranslation::new(format!(
                    "{} (after: {completed})",
                    inner.user_message
                ))
                .with_suggestion("Run 'ufwfe list' to check the current rule order")
                .with_suggestion("The completed step was not rolled back")
            }
            Error::MixedAddressFamily { .. } => {
                UfwErrorPattern::match_error("mixed ip versions")
            }
            Error::LogUnavailable { .. } => ErrorTranslation::new(self.to_string())
                .with_suggestion("Enable logging: sudo ufw logging low")
                .with_suggestion("Set 'log_path' in the ufwfe configuration"),
            other => ErrorTranslation::new(other.to_string()),
        }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
    pub help_url: Option<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
            help_url: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_help(mut self, url: impl Into<String>) -> Self {
        self.help_url = Some(url.into());
        self
    }
}

const UFW_MANPAGE: &str = "https://manpages.ubuntu.com/manpages/noble/man8/ufw.8.html";
const UFW_WIKI: &str = "https://help.ubuntu.com/community/UFW";

/// Database of ufw error patterns and their translations
pub struct UfwErrorPattern;

impl UfwErrorPattern {
    /// Matches an error message against known patterns and returns a user-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        // Permission errors
        if lower.contains("need to be root")
            || lower.contains("permission denied")
            || lower.contains("operation not permitted")
        {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run ufwfe with sudo, or configure run0/pkexec")
                .with_suggestion("Force a method with UFWFE_ELEVATION_METHOD=sudo")
                .with_help(UFW_WIKI);
        }

        // Missing ufw
        if lower.contains("no such file") || lower.contains("command not found") {
            return ErrorTranslation::new("ufw is not installed or not found in PATH")
                .with_suggestion("Install ufw: sudo apt install ufw  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install ufw  (Fedora)")
                .with_suggestion("Or: sudo pacman -S ufw  (Arch)")
                .with_help(UFW_WIKI);
        }

        // Unknown application profile
        if lower.contains("could not find a profile")
            || (lower.contains("profile") && lower.contains("not found"))
        {
            return ErrorTranslation::new("Unknown application profile")
                .with_suggestion("List known profiles: ufwfe apps")
                .with_suggestion("Profile names are case-sensitive")
                .with_suggestion("Refresh definitions: ufwfe apps --update")
                .with_help(UFW_MANPAGE);
        }

        // Mixed address families
        if lower.contains("mixed ip versions") {
            return ErrorTranslation::new("Source and destination use different IP versions")
                .with_suggestion("Use two IPv4 addresses or two IPv6 addresses")
                .with_suggestion("Or leave one side as 'any'");
        }

        // Position errors
        if lower.contains("invalid position") || lower.contains("non-existent rule") {
            return ErrorTranslation::new("Invalid rule position")
                .with_suggestion("Positions start at 1; check them with: ufwfe list")
                .with_suggestion("Use position 0 or omit it to append");
        }

        // Port errors
        if lower.contains("bad port") || lower.contains("invalid port") {
            return ErrorTranslation::new("Invalid port or port range")
                .with_suggestion("Port numbers must be between 1 and 65535")
                .with_suggestion("Ranges use a colon and need a protocol: 6000:6007/tcp")
                .with_suggestion("Multiple ports need a protocol: 80,443/tcp")
                .with_help(UFW_MANPAGE);
        }

        // Invalid address
        if lower.contains("bad source address")
            || lower.contains("bad destination address")
            || (lower.contains("invalid") && lower.contains("address"))
        {
            return ErrorTranslation::new("Invalid IP address or network")
                .with_suggestion("Use proper IP format: 192.168.1.1 or 192.168.1.0/24")
                .with_suggestion("For IPv6: 2001:db8::1 or 2001:db8::/32");
        }

        // Interface errors
        if lower.contains("interface") && lower.contains("invalid") {
            return ErrorTranslation::new("Network interface name is invalid")
                .with_suggestion("Check available interfaces: ip link show")
                .with_suggestion("Interface names are case-sensitive and max 15 chars");
        }

        // Another ufw instance holds the lock
        if lower.contains("lock") && (lower.contains("could not") || lower.contains("busy")) {
            return ErrorTranslation::new("Another ufw process is running")
                .with_suggestion("Wait a moment and try again");
        }

        // IPv6 disabled but a v6 rule was requested
        if lower.contains("ipv6") && lower.contains("disabled") {
            return ErrorTranslation::new("IPv6 support is disabled in ufw")
                .with_suggestion("Enable it with: ufwfe ipv6 on");
        }

        // Generic fallback
        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify ufw is working: sudo ufw status verbose")
            .with_help(UFW_WIKI)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
