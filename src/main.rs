//! ufwfe - a front end for ufw
//!
//! Lists and edits the ufw rule list by position, exports and imports rule
//! scripts, changes policies and defaults, and shows blocked connections from
//! the firewall log.
//!
//! # Usage
//!
//! ```bash
//! ufwfe list                               # Numbered rule list
//! ufwfe add allow from 10.0.0.0/8 to any port 22 proto tcp
//! ufwfe add insert 1 deny 23               # Insert at position 1
//! ufwfe edit 3 allow 'Apache Full'         # Replace rule 3
//! ufwfe move 4 1                           # Move rule 4 to the top
//! ufwfe export rules.sh                    # Save as a shell script
//! ufwfe import rules.sh --dry-run          # Preview an import
//! ufwfe events                             # Recent blocked connections
//! ufwfe allow-event 3                      # Allow the third listed connection
//! ufwfe watch                              # Follow the log until Ctrl-C
//! ufwfe show listening                     # ufw reports
//! ufwfe reset --yes                        # Back to installed defaults
//! ```
//!
//! # Security
//!
//! - Runs as an unprivileged user and elevates only the ufw call itself
//! - Rules are validated before ufw runs
//! - Audit trail of all privileged operations

use clap::{Parser, Subcommand, ValueEnum};
use ipnetwork::IpNetwork;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use ufwfe::audit::{self, AuditLog, EventType};
use ufwfe::config::{self, AppConfig};
use ufwfe::core::controller::RuleListController;
use ufwfe::core::events::{ConnectionEvent, Delivery};
use ufwfe::core::normalize::{DisplayRuleRow, format_for_display};
use ufwfe::core::profiles::find_profile;
use ufwfe::core::rule::{Direction, IpVersion, LogLevel, Policy, Rule, is_any_address};
use ufwfe::core::script::{ImportReport, export_to_path, import_from_path, parse_command};
use ufwfe::core::store::{MemoryStore, Report, RuleStore};
use ufwfe::core::tailer::LogTailer;
use ufwfe::core::ufw::UfwCli;
use ufwfe::l10n::Localizer;
use ufwfe::validators::{check_reserved_ip, check_well_known_port};
use ufwfe::watch::LogWatch;
use ufwfe::{Error, Result};

shadow_rs::shadow!(build);

#[derive(Parser)]
#[command(name = "ufwfe")]
#[command(about = "Rule editor and block-event viewer for ufw", long_about = None)]
#[command(version = build::PKG_VERSION)]
struct Cli {
    /// Log debug details to the state directory log
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyDirection {
    Incoming,
    Outgoing,
}

impl From<PolicyDirection> for Direction {
    fn from(value: PolicyDirection) -> Self {
        match value {
            PolicyDirection::Incoming => Direction::In,
            PolicyDirection::Outgoing => Direction::Out,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List rules with their positions
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show firewall state, default policies and build information
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Add a rule, e.g. `allow 22/tcp` or `insert 2 deny from 10.0.0.1`
    Add {
        /// Apply to IPv4 only
        #[arg(long, conflicts_with = "ipv6")]
        ipv4: bool,
        /// Apply to IPv6 only
        #[arg(long)]
        ipv6: bool,
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        rule: Vec<String>,
    },
    /// Replace the rule at a position
    Edit {
        position: usize,
        #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        rule: Vec<String>,
    },
    /// Move a rule to another position
    Move { from: usize, to: usize },
    /// Delete the rule at a position
    Delete { position: usize },
    /// Disable and re-enable an active firewall
    Reload,
    /// Enable the firewall
    Enable,
    /// Disable the firewall
    Disable,
    /// Set a default policy
    Default {
        direction: PolicyDirection,
        /// allow, deny or reject
        policy: String,
    },
    /// Set the logging level (off, low, medium, high, full)
    Logging { level: String },
    /// Turn IPv6 support on or off
    Ipv6 { state: Toggle },
    /// Show or change netfilter helper modules
    Module {
        name: Option<String>,
        state: Option<Toggle>,
    },
    /// List application profiles, or show one in detail
    Apps {
        /// Profile name
        name: Option<String>,
        /// Refresh profile definitions first
        #[arg(long)]
        update: bool,
    },
    /// Remove all rules and restore the installed defaults
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
    /// Print a ufw report (raw, builtins, before-rules, user-rules,
    /// after-rules, logging-rules, listening, added)
    Show { report: String },
    /// Export rules as a shell script
    Export { path: PathBuf },
    /// Import rules from a shell script
    Import {
        path: PathBuf,
        /// Show what would be added without changing the firewall
        #[arg(long)]
        dry_run: bool,
    },
    /// Show recent blocked connections
    Events {
        #[arg(long)]
        json: bool,
    },
    /// Allow a connection by its number in the `events` list
    AllowEvent { number: usize },
    /// Follow blocked connections until interrupted
    Watch,
    /// Show recent audit log entries
    Audit {
        #[arg(long, default_value_t = 20)]
        count: usize,
    },
    /// Print the configuration
    Config {
        /// Write it to the data directory, creating the file if needed
        #[arg(long)]
        save: bool,
    },
}

fn main() -> ExitCode {
    let _ = ufwfe::utils::ensure_dirs();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        let config = config::load_config().await;
        let l10n = config
            .locale_dir
            .as_deref()
            .map_or_else(Localizer::identity, Localizer::from_env);

        match handle_cli(cli.command, &config, &l10n).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("{e}");
                report_error(&l10n, &e);
                ExitCode::FAILURE
            }
        }
    })
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    if let Some(mut log_path) = ufwfe::utils::get_state_dir() {
        log_path.push("ufwfe.log");
        if let Ok(file) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)
        {
            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
            return;
        }
    }
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_writer(std::io::stderr)
        .init();
}

fn report_error(l10n: &Localizer, err: &Error) {
    let translation = err.translate();
    eprintln!("{}: {}", l10n.tr("Error"), l10n.tr(&translation.user_message));
    for suggestion in &translation.suggestions {
        eprintln!("  - {}", l10n.tr(suggestion));
    }
    if let Some(url) = &translation.help_url {
        eprintln!("  {}: {url}", l10n.tr("More information"));
    }
}

fn controller(config: &AppConfig) -> Result<RuleListController<UfwCli>> {
    Ok(RuleListController::new(UfwCli::detect(config)?))
}

/// Refuses rule edits on an inactive firewall when configured to.
fn ensure_active<S: RuleStore>(controller: &RuleListController<S>, config: &AppConfig) -> Result<()> {
    if config.require_active_for_edits && !controller.is_enabled()? {
        return Err(Error::validation(
            "firewall",
            "the firewall is inactive; run 'ufwfe enable' first",
        ));
    }
    Ok(())
}

fn parse_keyword<T: FromStr>(field: &str, value: &str) -> Result<T> {
    T::from_str(&value.to_ascii_lowercase())
        .map_err(|_| Error::validation(field, format!("unknown {field} '{value}'")))
}

/// Informational notes about well-known ports and reserved address ranges.
fn rule_notes(rule: &Rule) -> Vec<String> {
    let mut notes = Vec::new();
    if rule.destination_app.is_none()
        && let Ok(port) = rule.destination_port.parse::<u16>()
        && let Some(note) = check_well_known_port(port)
    {
        notes.push(note);
    }
    for address in [&rule.source_address, &rule.destination_address] {
        if !is_any_address(address)
            && let Ok(network) = address.parse::<IpNetwork>()
            && let Some(note) = check_reserved_ip(network)
        {
            notes.push(format!("{address}: {note}"));
        }
    }
    notes
}

fn print_rows(l10n: &Localizer, rows: &[DisplayRuleRow]) {
    if rows.is_empty() {
        println!("{}", l10n.tr("No rules"));
        return;
    }
    println!(
        "{:>4}  {:<7} {:<4} {:<5} {:<20} {:<12} {:<20} {:<16} {:<8} {}",
        "#", "Action", "Dir", "Proto", "From", "Port", "To", "Port", "Iface", "Log"
    );
    for row in rows {
        let r = &row.rule;
        println!(
            "{:>4}  {:<7} {:<4} {:<5} {:<20} {:<12} {:<20} {:<16} {:<8} {}",
            row.number,
            r.action,
            r.direction,
            r.protocol,
            r.source,
            r.source_port,
            r.destination,
            r.destination_port,
            r.interface,
            r.log
        );
    }
}

/// Last `config.max_events` blocked connections from the log tail, oldest first.
fn recent_events(config: &AppConfig) -> Result<VecDeque<ConnectionEvent>> {
    let cap = config.max_events;
    let mut recent: VecDeque<ConnectionEvent> = VecDeque::with_capacity(cap);
    let tailer = LogTailer::open(
        &config.log_candidates(),
        config.log_backlog_bytes,
        |event, _| {
            if cap == 0 {
                return;
            }
            if recent.len() == cap {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        },
    )?;
    tracing::debug!("Read backlog of {}", tailer.path().display());
    drop(tailer);
    Ok(recent)
}

fn print_event(event: &ConnectionEvent, delivery: Delivery) {
    match delivery {
        Delivery::Backlog => println!("  {event}"),
        Delivery::Live => println!("+ {event}"),
    }
}

fn print_import_report(l10n: &Localizer, report: &ImportReport) {
    for (line, message) in &report.applied {
        println!("{} {line}: {}", l10n.tr("line"), l10n.tr(message));
    }
    for skipped in &report.skipped {
        eprintln!("{}: {skipped}", l10n.tr("Skipped"));
    }
    println!(
        "{} {}, {} {}",
        report.applied.len(),
        l10n.tr("applied"),
        report.skipped.len(),
        l10n.tr("skipped")
    );
}

async fn set_enabled(config: &AppConfig, l10n: &Localizer, enable: bool) -> Result<()> {
    let mut controller = controller(config)?;
    let result = controller.set_enabled(enable);
    audit::record(
        EventType::SetEnabled,
        serde_json::json!({ "enabled": enable }),
        &result,
    )
    .await;
    println!("{}", l10n.tr(&result?));
    Ok(())
}

async fn handle_cli(command: Commands, config: &AppConfig, l10n: &Localizer) -> Result<()> {
    match command {
        Commands::List { json } => {
            let rows = controller(config)?.display_rows()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                print_rows(l10n, &rows);
            }
        }
        Commands::Status { json } => {
            let controller = controller(config)?;
            let status = controller.status()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(());
            }
            let state = if status.enabled { "active" } else { "inactive" };
            println!("{}: {}", l10n.tr("Status"), l10n.tr(state));
            println!(
                "{}: {} (incoming), {} (outgoing)",
                l10n.tr("Default"),
                status.incoming,
                status.outgoing
            );
            println!("{}: {}", l10n.tr("Logging"), controller.store().log_level()?);
            println!(
                "IPv6: {}",
                if status.ipv6 { l10n.tr("yes") } else { l10n.tr("no") }
            );
            println!("{}: {}", l10n.tr("Rules"), status.rule_count);
            println!(
                "ufwfe {} ({}{}, built {})",
                build::PKG_VERSION,
                build::SHORT_COMMIT,
                if build::GIT_CLEAN { "" } else { "-dirty" },
                build::BUILD_TIME
            );
        }
        Commands::Add { ipv4, ipv6, rule } => {
            let rule = parse_command(&rule)?;
            let mut controller = controller(config)?;
            ensure_active(&controller, config)?;
            for note in rule_notes(&rule) {
                println!("{}: {}", l10n.tr("Note"), l10n.tr(&note));
            }

            let result = match (ipv4, ipv6) {
                (true, _) => controller.insert_pinned(&rule, IpVersion::V4),
                (_, true) => controller.insert_pinned(&rule, IpVersion::V6),
                _ => controller.insert(&rule),
            };
            audit::record(
                EventType::InsertRule,
                serde_json::json!({ "rule": &rule }),
                &result,
            )
            .await;
            println!("{}", l10n.tr(&result?));
        }
        Commands::Edit { position, rule } => {
            let rule = parse_command(&rule)?;
            let mut controller = controller(config)?;
            ensure_active(&controller, config)?;
            let result = controller.update(position, &rule);
            audit::record(
                EventType::UpdateRule,
                serde_json::json!({ "position": position, "rule": &rule }),
                &result,
            )
            .await;
            println!("{}", l10n.tr(&result?));
        }
        Commands::Move { from, to } => {
            let mut controller = controller(config)?;
            ensure_active(&controller, config)?;
            let result = controller.move_rule(from, to);
            audit::record(
                EventType::MoveRule,
                serde_json::json!({ "from": from, "to": to }),
                &result,
            )
            .await;
            match result? {
                Some(message) => println!("{}", l10n.tr(&message)),
                None => println!("{}", l10n.tr("Rule already at that position")),
            }
        }
        Commands::Delete { position } => {
            let mut controller = controller(config)?;
            ensure_active(&controller, config)?;
            let rule = controller.store().rule_at(position)?;
            println!("{}: {}", l10n.tr("Deleting"), ufwfe::core::script::render_command(&rule));
            let result = controller.delete(position);
            audit::record(
                EventType::DeleteRule,
                serde_json::json!({ "position": position, "rule": &rule }),
                &result,
            )
            .await;
            println!("{}", l10n.tr(&result?));
        }
        Commands::Reload => {
            let mut controller = controller(config)?;
            let result = controller.reload();
            audit::record(EventType::Reload, serde_json::json!({}), &result).await;
            if result? {
                println!("{}", l10n.tr("Firewall reloaded"));
            } else {
                println!("{}", l10n.tr("Firewall not enabled (skipping reload)"));
            }
        }
        Commands::Enable => set_enabled(config, l10n, true).await?,
        Commands::Disable => set_enabled(config, l10n, false).await?,
        Commands::Default { direction, policy } => {
            let policy: Policy = parse_keyword("policy", &policy)?;
            let direction = Direction::from(direction);
            let mut controller = controller(config)?;
            let result = controller.set_default_policy(direction, policy);
            audit::record(
                EventType::DefaultPolicy,
                serde_json::json!({ "direction": direction.policy_name(), "policy": policy }),
                &result,
            )
            .await;
            println!("{}", l10n.tr(&result?));
        }
        Commands::Logging { level } => {
            let level: LogLevel = parse_keyword("logging level", &level)?;
            let mut controller = controller(config)?;
            let result = controller.set_log_level(level);
            audit::record(
                EventType::LogLevel,
                serde_json::json!({ "level": level }),
                &result,
            )
            .await;
            println!("{}", l10n.tr(&result?));
        }
        Commands::Ipv6 { state } => {
            let mut controller = controller(config)?;
            let result = controller.set_ipv6(state.enabled());
            audit::record(
                EventType::DefaultValue,
                serde_json::json!({ "key": "IPV6", "enabled": state.enabled() }),
                &result,
            )
            .await;
            result?;
            println!("{}", l10n.tr("IPv6 setting saved; run 'ufwfe reload' to apply"));
        }
        Commands::Module { name, state } => {
            let mut controller = controller(config)?;
            let modules = controller.ipt_modules()?;
            match (name, state) {
                (None, _) => {
                    for module in modules {
                        println!("{module}");
                    }
                }
                (Some(name), None) => {
                    let on = modules.contains(&name);
                    println!("{name}: {}", if on { l10n.tr("on") } else { l10n.tr("off") });
                }
                (Some(name), Some(state)) => {
                    let result = controller.set_ipt_module(&name, state.enabled());
                    audit::record(
                        EventType::DefaultValue,
                        serde_json::json!({ "key": "IPT_MODULES", "module": &name, "enabled": state.enabled() }),
                        &result,
                    )
                    .await;
                    result?;
                    println!("{}", l10n.tr("Module setting saved; run 'ufwfe reload' to apply"));
                }
            }
        }
        Commands::Apps { name, update } => {
            let mut controller = controller(config)?;
            if update {
                let result = controller.store_mut().update_profiles();
                audit::record(EventType::UpdateProfiles, serde_json::json!({}), &result).await;
                let message = result?;
                if !message.is_empty() {
                    println!("{}", l10n.tr(&message));
                }
            }
            let profiles = controller.store().application_profiles()?;
            if let Some(name) = name {
                let profile = find_profile(&profiles, &name)?;
                println!("{}: {}", l10n.tr("Profile"), profile.name);
                println!("{}: {}", l10n.tr("Title"), profile.title);
                println!("{}: {}", l10n.tr("Description"), profile.description);
                println!("{}:", l10n.tr("Ports"));
                for port in &profile.ports {
                    println!("  {port}");
                }
                return Ok(());
            }
            for profile in &profiles {
                println!(
                    "{:<24} {:<32} {}",
                    profile.name,
                    ufwfe::utils::truncate_string(&profile.title, 32),
                    profile.ports.join("|")
                );
            }
        }
        Commands::Export { path } => {
            let controller = controller(config)?;
            let result = export_to_path(&controller, &path);
            audit::record(
                EventType::ExportRules,
                serde_json::json!({ "path": &path }),
                &result,
            )
            .await;
            let written = result?;
            println!("{written} {} {}", l10n.tr("rules exported to"), path.display());
        }
        Commands::Import { path, dry_run } => {
            let mut controller = controller(config)?;
            if dry_run {
                let current = controller.store().rules()?;
                let mut preview = RuleListController::new(MemoryStore::new().with_rules(current.clone()));
                let report = import_from_path(&path, &mut preview)?;
                print_import_report(l10n, &report);
                for (index, rule) in preview.store().rules()?.iter().enumerate() {
                    if current.iter().any(|r| r.same_match(rule)) {
                        continue;
                    }
                    let row = format_for_display(rule);
                    println!(
                        "{} {}: {} {} {} -> {} {}",
                        l10n.tr("would add at"),
                        index + 1,
                        row.action,
                        row.source,
                        row.source_port,
                        row.destination,
                        row.destination_port
                    );
                }
                return Ok(());
            }

            ensure_active(&controller, config)?;
            let result = import_from_path(&path, &mut controller);
            audit::record(
                EventType::ImportRules,
                serde_json::json!({
                    "path": &path,
                    "applied": result.as_ref().map(|r| r.applied.len()).unwrap_or_default(),
                }),
                &result,
            )
            .await;
            print_import_report(l10n, &result?);
        }
        Commands::Reset { yes } => {
            if !yes {
                return Err(Error::validation(
                    "reset",
                    "resetting removes every rule; pass --yes to proceed",
                ));
            }
            let mut controller = controller(config)?;
            let result = controller.reset();
            audit::record(EventType::Reset, serde_json::json!({}), &result).await;
            println!("{}", l10n.tr(&result?));
            println!("{}", l10n.tr("Firewall defaults restored"));
        }
        Commands::Show { report } => {
            let report: Report = parse_keyword("report", &report)?;
            println!("{}", controller(config)?.store().show_report(report)?);
        }
        Commands::Events { json } => {
            let recent = recent_events(config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&recent)?);
            } else if recent.is_empty() {
                println!("{}", l10n.tr("No blocked connections"));
            } else {
                for (number, event) in recent.iter().enumerate() {
                    println!("{:>4}  {event}", number + 1);
                }
            }
        }
        Commands::AllowEvent { number } => {
            let recent = recent_events(config)?;
            let event = number
                .checked_sub(1)
                .and_then(|i| recent.get(i))
                .ok_or_else(|| {
                    Error::validation("event", format!("no blocked connection numbered {number}"))
                })?;
            let rule = Rule::from_event(event);
            let mut controller = controller(config)?;
            ensure_active(&controller, config)?;
            println!("{}: {}", l10n.tr("Adding"), ufwfe::core::script::render_command(&rule));

            let result = controller.allow_event(event);
            audit::record(
                EventType::AllowEvent,
                serde_json::json!({ "event": event, "rule": &rule }),
                &result,
            )
            .await;
            println!("{}", l10n.tr(&result?));
        }
        Commands::Watch => {
            let tailer = LogTailer::open(
                &config.log_candidates(),
                config.log_backlog_bytes,
                print_event,
            )?;
            println!(
                "{} {} ({})",
                l10n.tr("Watching"),
                tailer.path().display(),
                l10n.tr("Ctrl-C to stop")
            );

            let watch = LogWatch::new(tailer)?;
            tokio::select! {
                signal = tokio::signal::ctrl_c() => signal?,
                lost = watch.run() => lost?,
            }
        }
        Commands::Audit { count } => {
            let audit = AuditLog::new()?;
            let events = match audit.read_recent(count).await {
                Ok(events) => events,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
                Err(e) => return Err(e.into()),
            };
            if events.is_empty() {
                println!("{}", l10n.tr("No audit entries"));
            }
            for event in events.iter().rev() {
                let outcome = match &event.error {
                    None => "ok".to_string(),
                    Some(error) => format!("failed: {error}"),
                };
                println!(
                    "{}  {:<16} {outcome}  {}",
                    event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    serde_json::to_string(&event.event_type)?.trim_matches('"'),
                    event.details
                );
            }
        }
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(config)?);
            if save {
                config::save_config(config).await?;
                if let Some(path) = config::config_path() {
                    println!("{} {}", l10n.tr("Saved to"), path.display());
                }
            }
        }
    }
    Ok(())
}
