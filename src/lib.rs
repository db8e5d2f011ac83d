//! ufwfe - a front end for ufw
//!
//! Edits the ordered rule list of the Uncomplicated Firewall and follows its
//! log for blocked connections.
//!
//! # Architecture
//!
//! - [`core`] - Rule model, rule list controller, script codec, log tailing and
//!   the ufw adapter
//! - [`watch`] - File watcher driving the log tailer
//! - [`audit`] - Security audit logging for all privileged operations
//! - [`validators`] - Input validation and sanitization
//! - [`elevation`] - Privilege escalation for ufw and defaults writes
//! - [`config`] - Configuration persistence
//! - [`l10n`] - Message catalogs
//! - [`utils`] - Utility functions (XDG directories, etc.)

// Allow pedantic clippy warnings that are not worth fixing for this codebase
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::needless_lifetimes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod elevation;
pub mod l10n;
pub mod utils;
pub mod validators;
pub mod watch;

// Re-export commonly used types
pub use core::controller::RuleListController;
pub use core::error::{Error, Result};
pub use core::rule::{Action, Direction, Protocol, Rule};
pub use core::store::{MemoryStore, RuleStore};
pub use core::ufw::UfwCli;
