use crate::core::tailer::DEFAULT_BACKLOG_BYTES;
use crate::utils::get_data_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Preferred firewall log
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
    /// Tried in order when `log_path` cannot be opened
    #[serde(default = "default_fallback_log_paths")]
    pub fallback_log_paths: Vec<PathBuf>,
    /// Bytes of existing log replayed when tailing starts
    #[serde(default = "default_backlog_bytes")]
    pub log_backlog_bytes: u64,
    /// Most recent events kept when listing the backlog
    #[serde(default = "default_max_events")]
    pub max_events: usize,
    /// Directory holding `ufw.conf`, `user.rules` and `user6.rules`
    #[serde(default = "default_ufw_dir")]
    pub ufw_dir: PathBuf,
    #[serde(default = "default_ufw_defaults_path")]
    pub ufw_defaults_path: PathBuf,
    #[serde(default = "default_applications_dir")]
    pub applications_dir: PathBuf,
    /// Refuse rule edits while the firewall is disabled
    #[serde(default = "default_true")]
    pub require_active_for_edits: bool,
    /// Directory of `<lang>.json` message catalogs
    #[serde(default)]
    pub locale_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_path: default_log_path(),
            fallback_log_paths: default_fallback_log_paths(),
            log_backlog_bytes: default_backlog_bytes(),
            max_events: default_max_events(),
            ufw_dir: default_ufw_dir(),
            ufw_defaults_path: default_ufw_defaults_path(),
            applications_dir: default_applications_dir(),
            require_active_for_edits: true,
            locale_dir: None,
        }
    }
}

impl AppConfig {
    /// `log_path` followed by the fallbacks, without repeats.
    pub fn log_candidates(&self) -> Vec<PathBuf> {
        let mut paths = vec![self.log_path.clone()];
        for path in &self.fallback_log_paths {
            if !paths.contains(path) {
                paths.push(path.clone());
            }
        }
        paths
    }
}

fn default_log_path() -> PathBuf {
    PathBuf::from("/var/log/ufw.log")
}

fn default_fallback_log_paths() -> Vec<PathBuf> {
    ["/var/log/kern.log", "/var/log/messages", "/var/log/syslog"]
        .into_iter()
        .map(PathBuf::from)
        .collect()
}

fn default_backlog_bytes() -> u64 {
    DEFAULT_BACKLOG_BYTES
}

fn default_max_events() -> usize {
    100
}

fn default_ufw_dir() -> PathBuf {
    PathBuf::from("/etc/ufw")
}

fn default_ufw_defaults_path() -> PathBuf {
    PathBuf::from("/etc/default/ufw")
}

fn default_applications_dir() -> PathBuf {
    PathBuf::from("/etc/ufw/applications.d")
}

fn default_true() -> bool {
    true
}

/// Location of `config.json` in the data directory
pub fn config_path() -> Option<PathBuf> {
    get_data_dir().map(|dir| dir.join("config.json"))
}

/// Saves the config to the data directory using an atomic write pattern.
/// 1. Writes to a temporary file.
/// 2. Sets restrictive permissions (0o600).
/// 3. Atomically renames to the target path.
///
/// Does nothing when no data directory can be determined.
pub async fn save_config(config: &AppConfig) -> std::io::Result<()> {
    match config_path() {
        Some(path) => save_config_to(config, &path).await,
        None => Ok(()),
    }
}

/// [`save_config`] to an explicit path.
pub async fn save_config_to(config: &AppConfig, path: &Path) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(config)?;
    let temp_path = path.with_extension("json.tmp");

    // Permissions are set at creation so the file is never world-readable
    #[cfg(unix)]
    {
        use tokio::fs::OpenOptions;
        use tokio::io::AsyncWriteExt;

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(&temp_path)
            .await?;

        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
    }

    #[cfg(not(unix))]
    {
        use tokio::io::AsyncWriteExt;

        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;
    }

    tokio::fs::rename(&temp_path, path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            )
        } else {
            e
        }
    })
}

/// Loads the config, or returns the defaults if it is missing or unreadable.
pub async fn load_config() -> AppConfig {
    match config_path() {
        Some(path) => load_config_from(&path).await,
        None => AppConfig::default(),
    }
}

/// [`load_config`] from an explicit path.
pub async fn load_config_from(path: &Path) -> AppConfig {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => match serde_json::from_str::<AppConfig>(&json) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring invalid config {}: {e}", path.display());
                AppConfig::default()
            }
        },
        Err(_) => AppConfig::default(),
    }
}
