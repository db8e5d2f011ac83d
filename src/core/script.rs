//! `ufw` command rendering, parsing and rule script import/export
//!
//! An exported rule set is a POSIX shell script: a `#!/bin/sh` line followed by
//! one `ufw ...` invocation per listed rule. Application names are single-quoted
//! so names with spaces survive the shell. Import reads such a script back and
//! commits every command through [`RuleListController::insert`].
//!
//! The same grammar backs `ufwfe add`:
//!
//! ```text
//! [insert N] ACTION [in|out [on IFACE]] [log|log-all] PORT[/PROTO] | APP
//! [insert N] ACTION [in|out [on IFACE]] [log|log-all]
//!     [from ADDR [port PORT | app APP]] [to ADDR [port PORT | app APP]] [proto PROTO]
//! ```

use crate::core::controller::RuleListController;
use crate::core::error::{Error, Result};
use crate::core::rule::{
    ANY_ADDR, ANY_ADDR_V6, Action, Direction, IpVersion, LogType, Protocol, Rule, is_any_address,
    is_any_port,
};
use crate::core::store::RuleStore;
use std::io::{BufRead, Write};
use std::path::Path;
use std::str::FromStr;
use tracing::{info, warn};

pub const SHEBANG: &str = "#!/bin/sh";

/// Lines of an import script that carry a command start with this
pub const COMMAND_PREFIX: &str = "ufw ";

/// One argument of a script line
///
/// `App` is a quoted argument: the exporter quotes application names, so a
/// quoted target is never read as a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Word(String),
    App(String),
}

impl Token {
    fn word(text: impl Into<String>) -> Self {
        Token::Word(text.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Token::Word(w) | Token::App(w) => w,
        }
    }

    fn into_arg(self) -> String {
        match self {
            Token::Word(w) | Token::App(w) => w,
        }
    }

    fn render(&self) -> String {
        match self {
            Token::Word(w) => w.clone(),
            Token::App(a) => format!("'{a}'"),
        }
    }
}

fn is_short_form(rule: &Rule) -> bool {
    let has_destination = rule.destination_app.is_some() || !is_any_port(&rule.destination_port);
    rule.direction == Direction::In
        && rule.interface().is_none()
        && is_any_address(&rule.source_address)
        && is_any_address(&rule.destination_address)
        && rule.source_app.is_none()
        && is_any_port(&rule.source_port)
        && has_destination
}

fn endpoint_tokens(
    keyword: &str,
    address: &str,
    app: Option<&str>,
    port: &str,
    family_hint: Option<&'static str>,
) -> Vec<Token> {
    let concrete = !is_any_address(address);
    if !concrete && app.is_none() && is_any_port(port) && family_hint.is_none() {
        return Vec::new();
    }

    let addr = if concrete {
        address.to_string()
    } else {
        family_hint.unwrap_or("any").to_string()
    };
    let mut tokens = vec![Token::word(keyword), Token::Word(addr)];
    if let Some(app) = app {
        tokens.push(Token::word("app"));
        tokens.push(Token::App(app.to_string()));
    } else if !is_any_port(port) {
        tokens.push(Token::word("port"));
        tokens.push(Token::word(port));
    }
    tokens
}

fn tokens(rule: &Rule, pinned: Option<IpVersion>) -> Vec<Token> {
    let mut out = vec![Token::word(rule.action.as_str())];

    if pinned.is_none() && is_short_form(rule) {
        if let Some(kw) = rule.log_type.keyword() {
            out.push(Token::word(kw));
        }
        match rule.destination_app {
            Some(ref app) => out.push(Token::App(app.clone())),
            None if rule.protocol == Protocol::Any => {
                out.push(Token::word(&rule.destination_port));
            }
            None => out.push(Token::Word(format!(
                "{}/{}",
                rule.destination_port,
                rule.protocol.as_str()
            ))),
        }
        return out;
    }

    out.push(Token::word(rule.direction.as_str()));
    if let Some(iface) = rule.interface() {
        out.push(Token::word("on"));
        out.push(Token::word(iface));
    }
    if let Some(kw) = rule.log_type.keyword() {
        out.push(Token::word(kw));
    }

    // An explicit family sentinel keeps ufw from adding the rule for both families
    let all_any = is_any_address(&rule.source_address) && is_any_address(&rule.destination_address);
    let family_hint = match pinned {
        Some(IpVersion::V4) if all_any => Some(ANY_ADDR),
        Some(IpVersion::V6) if all_any => Some(ANY_ADDR_V6),
        _ => None,
    };

    let from = endpoint_tokens(
        "from",
        &rule.source_address,
        rule.source_app.as_deref(),
        &rule.source_port,
        family_hint,
    );
    let to = endpoint_tokens(
        "to",
        &rule.destination_address,
        rule.destination_app.as_deref(),
        &rule.destination_port,
        None,
    );
    if from.is_empty() && to.is_empty() {
        out.push(Token::word("to"));
        out.push(Token::word("any"));
    }
    out.extend(from);
    out.extend(to);

    if rule.protocol != Protocol::Any && !rule.uses_app() {
        out.push(Token::word("proto"));
        out.push(Token::word(rule.protocol.as_str()));
    }
    out
}

/// Arguments for `ufw`, unquoted, ready for `Command::args`.
pub fn command_args(rule: &Rule) -> Vec<String> {
    tokens(rule, None).into_iter().map(Token::into_arg).collect()
}

/// Like [`command_args`], but restricts an any-to-any rule to one IP family.
pub fn command_args_for(rule: &Rule, ip_version: IpVersion) -> Vec<String> {
    let pinned = (ip_version != IpVersion::Both).then_some(ip_version);
    tokens(rule, pinned).into_iter().map(Token::into_arg).collect()
}

/// Shell-safe `ufw ...` line for a rule.
///
/// ```
/// use ufwfe::core::rule::{Action, Rule};
/// use ufwfe::core::script::render_command;
///
/// let rule = Rule::new(Action::Allow).with_destination_app("Apache Full");
/// assert_eq!(render_command(&rule), "ufw allow 'Apache Full'");
/// ```
pub fn render_command(rule: &Rule) -> String {
    let rendered: Vec<String> = tokens(rule, None).iter().map(Token::render).collect();
    format!("{COMMAND_PREFIX}{}", rendered.join(" "))
}

/// Splits a script line into arguments, joining quoted multi-word app names.
///
/// A token that starts with a quote but does not end with one opens a capture
/// that runs until a token ends with a quote. Quotes are stripped and quoted
/// arguments come back as [`Token::App`].
///
/// # Errors
///
/// Returns [`Error::Validation`] if a quote is never closed.
pub fn tokenize_line(line: &str) -> Result<Vec<Token>> {
    let mut args = Vec::new();
    let mut pending: Option<String> = None;

    for word in line.split_whitespace() {
        if let Some(mut open) = pending.take() {
            open.push(' ');
            open.push_str(word);
            if word.ends_with('\'') {
                args.push(Token::App(open.trim_matches('\'').to_string()));
            } else {
                pending = Some(open);
            }
            continue;
        }

        let quoted = word.len() > 1 && word.starts_with('\'') && word.ends_with('\'');
        if word.starts_with('\'') && !quoted {
            pending = Some(word.to_string());
        } else if quoted {
            args.push(Token::App(word.trim_matches('\'').to_string()));
        } else {
            args.push(Token::word(word.trim_matches('\'')));
        }
    }

    if let Some(open) = pending {
        return Err(Error::validation(
            "command",
            format!("unterminated quote in {open}"),
        ));
    }
    Ok(args)
}

fn syntax(message: impl Into<String>) -> Error {
    Error::validation("command", message)
}

fn looks_like_port(token: &str) -> bool {
    token == "any" || token.starts_with(|c: char| c.is_ascii_digit())
}

fn parse_address(token: &str) -> String {
    if token == "any" {
        ANY_ADDR.to_string()
    } else {
        token.to_string()
    }
}

fn parse_protocol(token: &str) -> Result<Protocol> {
    Protocol::from_str(token).map_err(|_| syntax(format!("unsupported protocol '{token}'")))
}

/// Parses `ufw` arguments (without the leading `ufw`) into a rule.
///
/// The arguments are taken as unquoted words, as a shell passes them.
/// Address and port values are checked later by the controller.
///
/// # Errors
///
/// Returns [`Error::Validation`] on any syntax error.
pub fn parse_command<S: AsRef<str>>(args: &[S]) -> Result<Rule> {
    let tokens: Vec<Token> = args.iter().map(|a| Token::word(a.as_ref())).collect();
    parse_tokens(&tokens)
}

/// Like [`parse_command`] for tokens from [`tokenize_line`]; a quoted
/// short-form target is an application name.
pub fn parse_tokens(tokens: &[Token]) -> Result<Rule> {
    let mut iter = tokens.iter();
    let mut next = |what: &str| {
        iter.next()
            .map(Token::as_str)
            .ok_or_else(|| syntax(format!("missing {what}")))
    };

    let mut first = next("action")?;
    if first == "rule" {
        first = next("action")?;
    }

    let mut position = 0;
    if first == "insert" {
        let number = next("insert position")?;
        position = number
            .parse::<usize>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| syntax(format!("invalid position '{number}'")))?;
        first = next("action")?;
    }

    let action = Action::from_str(first).map_err(|_| syntax(format!("unknown action '{first}'")))?;
    let mut rule = Rule::new(action).with_position(position);

    let rest_tokens = iter.as_slice();
    let rest: Vec<&str> = rest_tokens.iter().map(Token::as_str).collect();
    let mut i = 0;

    if let Some(dir) = rest.get(i).and_then(|t| Direction::from_str(t).ok()) {
        rule.direction = dir;
        i += 1;
        if rest.get(i) == Some(&"on") {
            let iface = rest
                .get(i + 1)
                .ok_or_else(|| syntax("missing interface after 'on'"))?;
            match dir {
                Direction::In => rule.interface_in = Some((*iface).to_string()),
                Direction::Out => rule.interface_out = Some((*iface).to_string()),
            }
            i += 2;
        }
    }

    if let Some(log) = rest
        .get(i)
        .and_then(|t| LogType::from_str(t).ok())
        .filter(|l| *l != LogType::None)
    {
        rule.log_type = log;
        i += 1;
    }

    let remaining = &rest[i..];
    match remaining.first() {
        None => return Err(syntax("missing port, application or from/to clause")),
        Some(&("from" | "to" | "proto")) => parse_full_form(&mut rule, remaining)?,
        Some(_) if remaining.len() == 1 => parse_short_form(&mut rule, &rest_tokens[i])?,
        Some(_) => {
            return Err(syntax(format!(
                "unexpected arguments: {}",
                remaining[1..].join(" ")
            )));
        }
    }

    Ok(rule)
}

fn parse_short_form(rule: &mut Rule, target: &Token) -> Result<()> {
    let target = match target {
        Token::App(app) => {
            rule.destination_app = Some(app.clone());
            return Ok(());
        }
        Token::Word(word) => word.as_str(),
    };
    if !looks_like_port(target) {
        rule.destination_app = Some(target.to_string());
        return Ok(());
    }
    match target.split_once('/') {
        Some((port, proto)) => {
            rule.destination_port = port.to_string();
            rule.protocol = parse_protocol(proto)?;
        }
        None => rule.destination_port = target.to_string(),
    }
    Ok(())
}

fn parse_full_form(rule: &mut Rule, tokens: &[&str]) -> Result<()> {
    let (mut seen_from, mut seen_to, mut seen_proto) = (false, false, false);
    let mut i = 0;

    while i < tokens.len() {
        let keyword = tokens[i];
        let value = tokens
            .get(i + 1)
            .copied()
            .ok_or_else(|| syntax(format!("missing value after '{keyword}'")))?;
        i += 2;

        match keyword {
            "proto" => {
                if std::mem::replace(&mut seen_proto, true) {
                    return Err(syntax("duplicate 'proto'"));
                }
                rule.protocol = parse_protocol(value)?;
            }
            "from" | "to" => {
                let seen = if keyword == "from" { &mut seen_from } else { &mut seen_to };
                if std::mem::replace(seen, true) {
                    return Err(syntax(format!("duplicate '{keyword}'")));
                }
                let address = parse_address(value);
                let (port, app) = match tokens.get(i).copied() {
                    Some(kind @ ("port" | "app")) => {
                        let v = tokens
                            .get(i + 1)
                            .copied()
                            .ok_or_else(|| syntax(format!("missing value after '{kind}'")))?;
                        i += 2;
                        if kind == "port" {
                            (Some(v.to_string()), None)
                        } else {
                            (None, Some(v.to_string()))
                        }
                    }
                    _ => (None, None),
                };
                if keyword == "from" {
                    rule.source_address = address;
                    if let Some(p) = port {
                        rule.source_port = p;
                    }
                    rule.source_app = app;
                } else {
                    rule.destination_address = address;
                    if let Some(p) = port {
                        rule.destination_port = p;
                    }
                    rule.destination_app = app;
                }
            }
            other => return Err(syntax(format!("unexpected '{other}'"))),
        }
    }
    Ok(())
}

/// Writes the listed rules as a shell script and returns how many were written.
///
/// # Errors
///
/// Store errors while listing and I/O errors while writing are returned as-is.
pub fn export<S: RuleStore, W: Write>(
    controller: &RuleListController<S>,
    sink: &mut W,
) -> Result<usize> {
    let listing = controller.list_rules()?;
    writeln!(sink, "{SHEBANG}")?;
    let mut written = 0;
    for (_, rule) in listing.iter() {
        writeln!(sink, "{}", render_command(rule))?;
        written += 1;
    }
    sink.flush()?;
    Ok(written)
}

/// Mode of exported scripts: executable, readable by everyone
#[cfg(unix)]
pub const EXPORT_MODE: u32 = 0o755;

/// Exports to `path` through a temporary file in the same directory.
pub fn export_to_path<S: RuleStore>(controller: &RuleListController<S>, path: &Path) -> Result<usize> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    let written = export(controller, &mut tmp)?;
    // Temporary files are created 0600
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(EXPORT_MODE))?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    info!("Exported {written} rules to {}", path.display());
    Ok(written)
}

/// Outcome of an import
#[derive(Debug, Default)]
pub struct ImportReport {
    /// `(line number, store confirmation)` for every committed command
    pub applied: Vec<(usize, String)>,
    /// Lines that were not valid commands, as [`Error::ImportFormat`]
    pub skipped: Vec<Error>,
}

impl ImportReport {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Applies every `ufw ...` line read from `source`.
///
/// Lines not starting with `ufw ` are ignored. A line that does not form a
/// valid rule is skipped and recorded; the remaining lines are still applied.
///
/// # Errors
///
/// I/O errors and store failures abort the import. Rules committed before the
/// failure stay committed.
pub fn import<S: RuleStore, R: BufRead>(
    source: R,
    controller: &mut RuleListController<S>,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();

    for (index, line) in source.lines().enumerate() {
        let line = line?;
        let number = index + 1;
        let Some(command) = line.strip_prefix(COMMAND_PREFIX) else {
            continue;
        };

        let outcome = tokenize_line(command)
            .and_then(|tokens| parse_tokens(&tokens))
            .and_then(|rule| controller.insert(&rule));

        match outcome {
            Ok(message) => report.applied.push((number, message)),
            Err(e) if e.is_validation() => {
                warn!("Skipping import line {number}: {e}");
                report.skipped.push(Error::ImportFormat {
                    line: number,
                    message: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        "Imported {} rules ({} lines skipped)",
        report.applied.len(),
        report.skipped.len()
    );
    Ok(report)
}

/// Imports the script at `path`.
pub fn import_from_path<S: RuleStore>(
    path: &Path,
    controller: &mut RuleListController<S>,
) -> Result<ImportReport> {
    let file = std::fs::File::open(path)?;
    import(std::io::BufReader::new(file), controller)
}
