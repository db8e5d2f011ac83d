//! ufw command-line adapter
//!
//! [`UfwCli`] implements [`RuleStore`] on top of the installed `ufw`:
//!
//! - Mutations run `ufw` through [`crate::elevation`] and return its output.
//! - Rules are read from the `### tuple ###` lines ufw keeps in `user.rules`
//!   and `user6.rules`. IPv4 rules come first, then IPv6, which is the
//!   numbering `ufw status numbered` and `ufw delete N` use.
//! - Policies and other defaults are read from `/etc/default/ufw`. Defaults are
//!   written by installing a prepared copy of that file.
//! - Enabled state and logging level are read from `ufw.conf`.
//!
//! Reads go straight to the files without elevation, and `user.rules` is
//! readable by root only. Appending a rule never reads it.

use crate::config::AppConfig;
use crate::core::error::{Error, Result};
use crate::core::normalize::fixup_for_storage;
use crate::core::profiles::{ApplicationProfile, load_profiles_dir};
use crate::core::rule::{Action, Direction, IpVersion, LogLevel, LogType, Policy, Protocol, Rule};
use crate::core::script::command_args_for;
use crate::core::store::{Report, RuleStore};
use crate::elevation::{create_elevated_install_command, create_elevated_ufw_command};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Prefix of the machine-readable rule lines in `user.rules`
pub const TUPLE_MARKER: &str = "### tuple ###";

/// Oldest ufw with `insert` and per-rule interfaces
pub const MIN_VERSION: UfwVersion = UfwVersion {
    major: 0,
    minor: 31,
    patch: 0,
};

/// Version reported by `ufw version`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct UfwVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl UfwVersion {
    /// Parses the first version-looking token of `ufw version` output.
    ///
    /// Distribution suffixes (`0.36.2-1ubuntu1`) are ignored.
    pub fn parse(output: &str) -> Option<Self> {
        let token = output
            .split_whitespace()
            .find(|t| t.starts_with(|c: char| c.is_ascii_digit()))?;

        let mut parts = token.split('.').map(|part| {
            let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
            digits.parse::<u32>().ok()
        });

        let major = parts.next()??;
        let minor = parts.next()??;
        let patch = parts.next().flatten().unwrap_or(0);
        Some(Self {
            major,
            minor,
            patch,
        })
    }
}

impl fmt::Display for UfwVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Decodes the `%20` escapes ufw uses for spaces in application names
fn decode_app(name: &str) -> Option<String> {
    (name != "-").then(|| name.replace("%20", " "))
}

/// Parses one `### tuple ###` line of `user.rules` / `user6.rules`.
///
/// Layout: `action proto dport dst sport src [dapp sapp] direction[_iface]`,
/// optionally followed by `comment=...`. Returns `None` for route rules,
/// protocols other than tcp/udp/any and malformed lines.
pub fn parse_tuple(line: &str) -> Option<Rule> {
    let body = line.trim().strip_prefix(TUPLE_MARKER)?;
    let fields: Vec<&str> = body
        .split_whitespace()
        .filter(|f| !f.starts_with("comment="))
        .collect();

    let (action_field, rest) = fields.split_first()?;
    if action_field.starts_with("route:") {
        return None;
    }

    let (action, log_type) = match action_field.split_once('_') {
        Some((action, log)) => (action, LogType::from_str(log).ok()?),
        None => (*action_field, LogType::None),
    };
    let action = Action::from_str(action).ok()?;

    let (proto, dport, dst, sport, src, apps, direction) = match rest {
        [proto, dport, dst, sport, src, direction] => {
            (*proto, *dport, *dst, *sport, *src, None, *direction)
        }
        [proto, dport, dst, sport, src, dapp, sapp, direction] => (
            *proto,
            *dport,
            *dst,
            *sport,
            *src,
            Some((*dapp, *sapp)),
            *direction,
        ),
        _ => return None,
    };

    let (direction, interface) = match direction.split_once('_') {
        Some((dir, iface)) => (Direction::from_str(dir).ok()?, Some(iface)),
        None => (Direction::from_str(direction).ok()?, None),
    };

    let mut rule = Rule::new(action)
        .with_direction(direction)
        .with_protocol(Protocol::from_str(proto).ok()?)
        .with_destination_port(dport)
        .with_destination(dst)
        .with_source_port(sport)
        .with_source(src)
        .with_log_type(log_type);

    if let Some((dapp, sapp)) = apps {
        rule.destination_app = decode_app(dapp);
        rule.source_app = decode_app(sapp);
    }
    match (direction, interface) {
        (Direction::In, Some(iface)) => rule.interface_in = Some(iface.to_string()),
        (Direction::Out, Some(iface)) => rule.interface_out = Some(iface.to_string()),
        _ => {}
    }

    Some(fixup_for_storage(&rule))
}

/// Rules of one `user.rules`-style file, in file order.
pub fn parse_user_rules(content: &str) -> Vec<Rule> {
    content
        .lines()
        .filter(|line| line.trim_start().starts_with(TUPLE_MARKER))
        .filter_map(|line| {
            let rule = parse_tuple(line);
            if rule.is_none() {
                debug!("Skipping unsupported rule tuple: {}", line.trim());
            }
            rule
        })
        .collect()
}

/// `KEY=value` pairs of a shell-style defaults file. Values keep their quotes.
pub fn parse_defaults(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .collect()
}

/// Sets `key=value` in a defaults file, appending the key if it is absent.
pub fn replace_default(content: &str, key: &str, value: &str) -> String {
    let prefix = format!("{key}=");
    let mut found = false;
    let mut lines: Vec<String> = content
        .lines()
        .map(|line| {
            if !found && line.trim_start().starts_with(&prefix) {
                found = true;
                format!("{key}={value}")
            } else {
                line.to_string()
            }
        })
        .collect();
    if !found {
        lines.push(format!("{key}={value}"));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn read_error(path: &Path, e: &std::io::Error) -> Error {
    Error::Store {
        message: format!("cannot read {}: {e}", path.display()),
        stderr: Some(e.to_string()),
        exit_code: None,
    }
}

/// Reads a file, treating a missing optional file as empty.
fn read_config_file(path: &Path, optional: bool) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(e) if optional && e.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} not found, treating as empty", path.display());
            Ok(String::new())
        }
        Err(e) => Err(read_error(path, &e)),
    }
}

fn run_failure(program: &str, output: &std::process::Output) -> Error {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    let message = if stderr.is_empty() {
        if stdout.is_empty() {
            format!("{program} exited with {}", output.status)
        } else {
            stdout
        }
    } else {
        stderr.clone()
    };
    Error::Store {
        message,
        stderr: (!stderr.is_empty()).then_some(stderr),
        exit_code: output.status.code(),
    }
}

/// [`RuleStore`] backed by the system's ufw
#[derive(Debug, Clone)]
pub struct UfwCli {
    ufw_dir: PathBuf,
    defaults_path: PathBuf,
    applications_dir: PathBuf,
}

impl UfwCli {
    pub fn new(
        ufw_dir: impl Into<PathBuf>,
        defaults_path: impl Into<PathBuf>,
        applications_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            ufw_dir: ufw_dir.into(),
            defaults_path: defaults_path.into(),
            applications_dir: applications_dir.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            &config.ufw_dir,
            &config.ufw_defaults_path,
            &config.applications_dir,
        )
    }

    /// Builds the adapter and checks the installed ufw is recent enough.
    ///
    /// # Errors
    ///
    /// - [`Error::Store`] if `ufw version` fails or reports an unsupported version
    pub fn detect(config: &AppConfig) -> Result<Self> {
        let cli = Self::from_config(config);
        let version = cli.version()?;
        if version < MIN_VERSION {
            return Err(Error::Store {
                message: format!("ufw {version} is not supported, {MIN_VERSION} or newer is required"),
                stderr: None,
                exit_code: None,
            });
        }
        info!("Using ufw {version}");
        Ok(cli)
    }

    pub fn version(&self) -> Result<UfwVersion> {
        let output = Self::run(&["version"])?;
        UfwVersion::parse(&output).ok_or_else(|| Error::Store {
            message: format!("cannot parse ufw version from '{output}'"),
            stderr: None,
            exit_code: None,
        })
    }

    /// Current logging level from `ufw.conf`; `off` when logging is disabled.
    pub fn log_level(&self) -> Result<LogLevel> {
        let conf = self.ufw_conf()?;
        if conf.get("LOGLEVEL").is_none_or(|v| v.trim_matches('"') == "off") {
            return Ok(LogLevel::Off);
        }
        Ok(conf
            .get("LOGLEVEL")
            .and_then(|v| LogLevel::from_str(v.trim_matches('"')).ok())
            .unwrap_or_default())
    }

    fn ufw_conf(&self) -> Result<BTreeMap<String, String>> {
        let path = self.ufw_dir.join("ufw.conf");
        Ok(parse_defaults(&read_config_file(&path, false)?))
    }

    fn defaults(&self) -> Result<BTreeMap<String, String>> {
        Ok(parse_defaults(&read_config_file(&self.defaults_path, false)?))
    }

    /// Runs ufw with `args` and returns its trimmed standard output.
    fn run(args: &[&str]) -> Result<String> {
        debug!("Running ufw {}", args.join(" "));
        let mut command = create_elevated_ufw_command(args)?;
        let program = command.get_program().to_string_lossy().into_owned();

        let output = command.output().map_err(|e| Error::Store {
            message: format!("cannot run {program}: {e}"),
            stderr: Some(e.to_string()),
            exit_code: None,
        })?;

        if !output.status.success() {
            let err = run_failure(&program, &output);
            warn!("ufw {} failed: {err}", args.join(" "));
            return Err(err);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl RuleStore for UfwCli {
    fn rules(&self) -> Result<Vec<Rule>> {
        let mut rules = parse_user_rules(&read_config_file(
            &self.ufw_dir.join("user.rules"),
            true,
        )?);
        rules.extend(parse_user_rules(&read_config_file(
            &self.ufw_dir.join("user6.rules"),
            true,
        )?));
        Ok(rules)
    }

    fn insert(&mut self, rule: &Rule, ip_version: IpVersion) -> Result<String> {
        let mut args = Vec::new();
        if rule.position > 0 {
            args.push("insert".to_string());
            args.push(rule.position.to_string());
        }
        args.extend(command_args_for(rule, ip_version));

        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        Self::run(&args)
    }

    fn delete(&mut self, position: usize) -> Result<String> {
        Self::run(&["--force", "delete", &position.to_string()])
    }

    /// ufw does not keep insert positions on stored rules.
    fn reset_position(&mut self, _position: usize) -> Result<()> {
        Ok(())
    }

    fn is_enabled(&self) -> Result<bool> {
        Ok(self
            .ufw_conf()?
            .get("ENABLED")
            .is_some_and(|v| v.trim_matches('"').eq_ignore_ascii_case("yes")))
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<String> {
        if enabled {
            Self::run(&["--force", "enable"])
        } else {
            Self::run(&["disable"])
        }
    }

    fn default_policy(&self, direction: Direction) -> Result<Policy> {
        let key = match direction {
            Direction::In => "DEFAULT_INPUT_POLICY",
            Direction::Out => "DEFAULT_OUTPUT_POLICY",
        };
        let defaults = self.defaults()?;
        let target = defaults.get(key).ok_or_else(|| Error::Store {
            message: format!("{key} is missing from {}", self.defaults_path.display()),
            stderr: None,
            exit_code: None,
        })?;
        Policy::from_target(target).ok_or_else(|| Error::Store {
            message: format!("unknown {key} '{target}'"),
            stderr: None,
            exit_code: None,
        })
    }

    fn set_default_policy(&mut self, direction: Direction, policy: Policy) -> Result<String> {
        Self::run(&["default", policy.as_ref(), direction.policy_name()])
    }

    fn default_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.defaults()?.remove(key))
    }

    fn set_default_value(&mut self, key: &str, value: &str) -> Result<()> {
        let content = read_config_file(&self.defaults_path, false)?;
        let updated = replace_default(&content, key, value);

        let mut temp = tempfile::NamedTempFile::new()?;
        temp.write_all(updated.as_bytes())?;
        temp.as_file().sync_all()?;

        let source = temp.path().to_string_lossy().into_owned();
        let target = self.defaults_path.to_string_lossy().into_owned();
        let output = create_elevated_install_command(&["-m", "644", &source, &target])?
            .output()?;
        if !output.status.success() {
            return Err(run_failure("install", &output));
        }
        info!("Set {key}={value} in {target}");
        Ok(())
    }

    fn set_log_level(&mut self, level: LogLevel) -> Result<String> {
        Self::run(&["logging", level.as_ref()])
    }

    fn application_profiles(&self) -> Result<Vec<ApplicationProfile>> {
        Ok(load_profiles_dir(&self.applications_dir)?)
    }

    fn update_profiles(&mut self) -> Result<String> {
        Self::run(&["app", "update", "all"])
    }

    fn reset(&mut self) -> Result<String> {
        let message = Self::run(&["--force", "reset"])?;
        info!("Firewall reset to installed defaults");
        Ok(message)
    }

    /// Reports read iptables state, so they run elevated like mutations.
    fn show_report(&self, report: Report) -> Result<String> {
        Self::run(&["show", report.as_ref()])
    }
}
