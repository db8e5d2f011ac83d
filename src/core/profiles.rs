//! Application profile management
//!
//! Application profiles are INI files in ufw's `applications.d` directory. Each
//! section names one profile and binds it to one or more port/protocol specs:
//!
//! ```text
//! [Apache Full]
//! title=Web Server (HTTP,HTTPS)
//! description=Apache v2 is the next generation of the omnipresent Apache web server.
//! ports=80,443/tcp
//! ```
//!
//! Profiles are read-only here; ufw owns the directory.

use crate::validators::{validate_app_name, validate_port_spec};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Files larger than this are skipped, matching ufw's own limit
pub const MAX_PROFILE_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Error type for profile operations
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("Invalid profile '{name}': {reason}")]
    Invalid { name: String, reason: String },

    #[error("Profile not found: {0}")]
    NotFound(String),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A named port/protocol binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationProfile {
    pub name: String,
    pub title: String,
    pub description: String,
    /// Port specs such as `22/tcp` or `80,443/tcp`
    pub ports: Vec<String>,
}

impl ApplicationProfile {
    /// Checks the name and every port spec.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let invalid = |reason: String| ProfileError::Invalid {
            name: self.name.clone(),
            reason,
        };

        validate_app_name(&self.name).map_err(invalid)?;
        if self.title.is_empty() {
            return Err(invalid("missing title".to_string()));
        }
        if self.description.is_empty() {
            return Err(invalid("missing description".to_string()));
        }
        if self.ports.is_empty() {
            return Err(invalid("missing ports".to_string()));
        }

        for entry in &self.ports {
            let (ports, protocol) = match entry.split_once('/') {
                Some((ports, protocol)) => (ports, Some(protocol)),
                None => (entry.as_str(), None),
            };
            if let Some(protocol) = protocol
                && protocol != "tcp"
                && protocol != "udp"
            {
                return Err(invalid(format!("unsupported protocol '{protocol}'")));
            }
            let spec = validate_port_spec(ports).map_err(invalid)?;
            if spec.needs_protocol() && protocol.is_none() {
                return Err(invalid(format!(
                    "'{entry}' lists several ports without a protocol"
                )));
            }
        }

        Ok(())
    }
}

/// Parses the profile sections of one INI file.
///
/// Invalid sections are logged and skipped; a broken profile must not hide the
/// valid ones next to it.
pub fn parse_profiles(content: &str) -> Vec<ApplicationProfile> {
    let mut profiles = Vec::new();
    let mut current: Option<ApplicationProfile> = None;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            profiles.extend(current.take());
            current = Some(ApplicationProfile {
                name: name.trim().to_string(),
                title: String::new(),
                description: String::new(),
                ports: Vec::new(),
            });
            continue;
        }

        let Some(ref mut profile) = current else {
            debug!("Ignoring profile line outside a section: {line}");
            continue;
        };
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "title" => profile.title = value.to_string(),
            "description" => profile.description = value.to_string(),
            "ports" => {
                profile.ports = value
                    .split('|')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect();
            }
            other => debug!("Unknown profile key '{other}' in [{}]", profile.name),
        }
    }
    profiles.extend(current);

    profiles
        .into_iter()
        .filter(|profile| match profile.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!("Skipping application profile: {e}");
                false
            }
        })
        .collect()
}

/// Loads every profile in `dir`, sorted by name.
///
/// Hidden files, non-files and oversized files are skipped. A missing directory
/// yields no profiles.
pub fn load_profiles_dir(dir: &Path) -> Result<Vec<ApplicationProfile>, ProfileError> {
    let io_err = |source: std::io::Error| ProfileError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Profile directory {} does not exist", dir.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(io_err(e)),
    };

    let mut profiles: Vec<ApplicationProfile> = Vec::new();
    for entry in entries {
        let entry = entry.map_err(io_err)?;
        let path = entry.path();

        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_none_or(|n| n.starts_with('.'));
        if hidden {
            continue;
        }

        let metadata = entry.metadata().map_err(io_err)?;
        if !metadata.is_file() {
            continue;
        }
        if metadata.len() > MAX_PROFILE_FILE_SIZE {
            warn!("Skipping oversized profile file {}", path.display());
            continue;
        }

        let content = std::fs::read(&path).map_err(|source| ProfileError::Io {
            path: path.clone(),
            source,
        })?;
        for profile in parse_profiles(&String::from_utf8_lossy(&content)) {
            if profiles.iter().any(|p| p.name == profile.name) {
                warn!("Duplicate application profile '{}' in {}", profile.name, path.display());
                continue;
            }
            profiles.push(profile);
        }
    }

    profiles.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(profiles)
}

/// Looks a profile up by its exact, case-sensitive name.
pub fn find_profile<'a>(
    profiles: &'a [ApplicationProfile],
    name: &str,
) -> Result<&'a ApplicationProfile, ProfileError> {
    profiles
        .iter()
        .find(|p| p.name == name)
        .ok_or_else(|| ProfileError::NotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const APACHE: &str = "\
[Apache]
title=Web Server
description=Apache v2 is the next generation of the omnipresent Apache web server.
ports=80/tcp

[Apache Full]
title=Web Server (HTTP,HTTPS)
description=Apache v2 is the next generation of the omnipresent Apache web server.
ports=80,443/tcp
";

    #[test]
    fn test_parse_sections() {
        let profiles = parse_profiles(APACHE);
        assert_eq!(profiles.len(), 2);
        assert_eq!(profiles[1].name, "Apache Full");
        assert_eq!(profiles[1].ports, ["80,443/tcp"]);
    }

    #[test]
    fn test_parse_pipe_separated_ports() {
        let profiles = parse_profiles(
            "[Samba]\ntitle=LanManager-like file and printer server\n\
             description=The Samba software suite\nports=137,138/udp|139,445/tcp\n",
        );
        assert_eq!(profiles[0].ports, ["137,138/udp", "139,445/tcp"]);
    }

    #[test]
    fn test_invalid_sections_are_skipped() {
        let profiles = parse_profiles(
            "[NoPorts]\ntitle=x\ndescription=y\n\n\
             [BadProto]\ntitle=x\ndescription=y\nports=22/sctp\n\n\
             [ListNoProto]\ntitle=x\ndescription=y\nports=80,443\n\n\
             [OpenSSH]\ntitle=Secure shell server\ndescription=OpenSSH\nports=22/tcp\n",
        );
        let names: Vec<_> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["OpenSSH"]);
    }

    #[test]
    fn test_load_dir_skips_hidden_and_sorts() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("apache2-utils.ufw.profile"), APACHE).unwrap();
        fs::write(
            dir.path().join("openssh-server"),
            "[OpenSSH]\ntitle=Secure shell server\ndescription=OpenSSH\nports=22/tcp\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(".hidden"),
            "[Hidden]\ntitle=x\ndescription=y\nports=1/tcp\n",
        )
        .unwrap();
        fs::create_dir(dir.path().join("subdir")).unwrap();

        let profiles = load_profiles_dir(dir.path()).unwrap();
        let names: Vec<_> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Apache", "Apache Full", "OpenSSH"]);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let profiles = load_profiles_dir(&dir.path().join("nope")).unwrap();
        assert!(profiles.is_empty());
    }

    #[test]
    fn test_find_profile_is_case_sensitive() {
        let profiles = parse_profiles(APACHE);
        assert!(find_profile(&profiles, "Apache Full").is_ok());
        assert!(matches!(
            find_profile(&profiles, "apache full"),
            Err(ProfileError::NotFound(_))
        ));
    }
}
