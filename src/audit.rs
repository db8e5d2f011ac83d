/// Audit logging for privileged operations
///
/// Every change made through ufw (rules, policies, defaults, logging, profiles)
/// and every script import or export is recorded as one JSON line in the state
/// directory.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    InsertRule,
    UpdateRule,
    MoveRule,
    DeleteRule,
    Reload,
    SetEnabled,
    DefaultPolicy,
    DefaultValue,
    LogLevel,
    ImportRules,
    ExportRules,
    UpdateProfiles,
    Reset,
    AllowEvent,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    pub event_type: EventType,

    pub success: bool,

    /// Operation arguments
    pub details: serde_json::Value,

    /// Error message if the operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }

    /// Builds an event from an operation's outcome.
    pub fn from_result<T, E: std::fmt::Display>(
        event_type: EventType,
        details: serde_json::Value,
        result: &Result<T, E>,
    ) -> Self {
        Self::new(
            event_type,
            result.is_ok(),
            details,
            result.as_ref().err().map(ToString::to_string),
        )
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Opens the audit log in the state directory.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    pub fn with_path(log_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
        }
    }

    /// Appends an event as one JSON line.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be opened or written
    pub async fn log(&self, event: AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(&event)?;

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Reads up to `count` of the most recent events, newest first.
    ///
    /// Lines that are not valid events are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the file cannot be read
    pub async fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = tokio::fs::read_to_string(&self.log_path).await?;

        Ok(content
            .lines()
            .rev()
            .filter_map(|line| serde_json::from_str(line).ok())
            .take(count)
            .collect())
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Records the outcome of a privileged operation.
///
/// Audit failures never fail the operation; they are logged as warnings.
pub async fn record<T, E: std::fmt::Display>(
    event_type: EventType,
    details: serde_json::Value,
    result: &Result<T, E>,
) {
    match AuditLog::new() {
        Ok(audit) => {
            if let Err(e) = audit
                .log(AuditEvent::from_result(event_type, details, result))
                .await
            {
                tracing::warn!("Failed to write audit log: {}", e);
            }
        }
        Err(e) => tracing::debug!("Audit log unavailable: {}", e),
    }
}
