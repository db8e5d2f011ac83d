//! Privilege elevation for system operations
//!
//! ufwfe runs as an unprivileged user and only elevates for specific operations:
//!
//! - **ufw**: every rule, policy and logging change
//! - **install**: writing `/etc/default/ufw`
//!
//! # Elevation Strategy
//!
//! - **Preferred**: `run0` when available (systemd v256+, no SUID)
//! - **Terminal fallback**: `sudo`
//! - **No terminal**: `pkexec` for graphical authentication
//!
//! # Environment Variables
//!
//! - `UFWFE_ELEVATION_METHOD`: Force a specific elevation method (`sudo`, `run0`, or `pkexec`).
//!   Useful for scripts with sudoers NOPASSWD rules.
//!   Example: `UFWFE_ELEVATION_METHOD=sudo ufwfe reload`
//! - `UFWFE_TEST_NO_ELEVATION`: Bypass elevation entirely (for testing only).
//! - `UFWFE_UFW_COMMAND`: Run this program instead of `ufw`. Ignored unless
//!   `UFWFE_TEST_NO_ELEVATION` is set.
//!
//! # Security
//!
//! - Only specific binaries can be elevated (ufw, install)
//! - Commands are constructed without shell interpolation
//! - Audit logging tracks all privileged operations (via caller)
//!
//! # Example
//!
//! ```no_run
//! use ufwfe::elevation::create_elevated_ufw_command;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let output = create_elevated_ufw_command(&["status"])?.output()?;
//! # Ok(())
//! # }
//! ```

use std::io;
use std::process::Command;

/// Error type for privilege elevation operations
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// pkexec binary not found in PATH
    #[error("pkexec not found - please install PolicyKit")]
    PkexecNotFound,

    /// Requested elevation method is not available (binary not found)
    #[error("Elevation method '{0}' is not available (binary not found)")]
    MethodNotAvailable(String),

    /// Invalid value for `UFWFE_ELEVATION_METHOD`
    #[error("Invalid UFWFE_ELEVATION_METHOD '{0}'. Valid options: sudo, run0, pkexec")]
    InvalidMethod(String),

    /// Generic I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<ElevationError> for crate::core::error::Error {
    fn from(err: ElevationError) -> Self {
        crate::core::error::Error::Elevation(err.to_string())
    }
}

fn test_mode() -> bool {
    std::env::var("UFWFE_TEST_NO_ELEVATION").is_ok()
}

/// Program run for `ufw` operations.
///
/// `UFWFE_UFW_COMMAND` is only honored together with `UFWFE_TEST_NO_ELEVATION`,
/// so an override never runs elevated.
pub fn ufw_program() -> String {
    if !test_mode() {
        return "ufw".to_string();
    }
    std::env::var("UFWFE_UFW_COMMAND")
        .ok()
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "ufw".to_string())
}

/// Checks if a binary exists in PATH
fn binary_exists(name: &str) -> bool {
    std::env::var_os("PATH")
        .and_then(|paths| {
            std::env::split_paths(&paths).find_map(|dir| {
                let full_path = dir.join(name);
                if full_path.is_file() {
                    Some(full_path)
                } else {
                    None
                }
            })
        })
        .is_some()
}

fn wrapped(wrapper: &str, program: &str, args: &[&str]) -> Command {
    let mut cmd = Command::new(wrapper);
    cmd.arg(program).args(args);
    cmd
}

/// Internal helper to build an elevated command for a specific program.
///
/// Callers must use the specific functions (`create_elevated_ufw_command`,
/// `create_elevated_install_command`) so only approved binaries are elevated.
fn build_elevated_command(program: &str, args: &[&str]) -> Result<Command, ElevationError> {
    use std::os::fd::AsFd;

    // 1. Test mode override
    if test_mode() {
        let mut cmd = Command::new(program);
        cmd.args(args);
        return Ok(cmd);
    }

    // 2. Already root
    if nix::unistd::getuid().is_root() {
        let mut cmd = Command::new(program);
        cmd.args(args);
        return Ok(cmd);
    }

    // 3. Explicit method
    if let Ok(method) = std::env::var("UFWFE_ELEVATION_METHOD") {
        let method = method.to_lowercase();
        if !method.is_empty() {
            return match method.as_str() {
                "sudo" | "run0" | "pkexec" => {
                    if binary_exists(&method) {
                        Ok(wrapped(&method, program, args))
                    } else {
                        Err(ElevationError::MethodNotAvailable(method))
                    }
                }
                _ => Err(ElevationError::InvalidMethod(method)),
            };
        }
    }

    // 4. Automatic detection
    if binary_exists("run0") {
        return Ok(wrapped("run0", program, args));
    }

    let is_atty = nix::unistd::isatty(std::io::stdin().as_fd()).unwrap_or(false);
    if is_atty {
        Ok(wrapped("sudo", program, args))
    } else {
        if !binary_exists("pkexec") {
            return Err(ElevationError::PkexecNotFound);
        }
        Ok(wrapped("pkexec", program, args))
    }
}

/// Creates an elevated `ufw` command with the specified arguments
///
/// Arguments are passed directly to `ufw` without shell interpretation, so
/// application names with spaces need no quoting here.
///
/// # Testing
///
/// Set `UFWFE_TEST_NO_ELEVATION=1` to run the program directly; only then does
/// `UFWFE_UFW_COMMAND` substitute a mock.
pub fn create_elevated_ufw_command(args: &[&str]) -> Result<Command, ElevationError> {
    build_elevated_command(&ufw_program(), args)
}

/// Creates an elevated `install` command with the specified arguments
///
/// Used to replace `/etc/default/ufw` with a prepared temporary file.
///
/// # Example
///
/// ```no_run
/// use ufwfe::elevation::create_elevated_install_command;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let status = create_elevated_install_command(&["-m", "644", "/tmp/ufw", "/etc/default/ufw"])?
///     .status()?;
/// # Ok(())
/// # }
/// ```
pub fn create_elevated_install_command(args: &[&str]) -> Result<Command, ElevationError> {
    build_elevated_command("install", args)
}
