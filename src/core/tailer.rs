//! Firewall log tailing
//!
//! [`LogTailer`] owns the log file handle. On open it replays the last few KiB
//! of the log as backlog, then delivers newly appended lines each time
//! [`LogTailer::on_file_modified`] is called. It does not watch the file itself;
//! see [`crate::watch::LogWatch`] for that.
//!
//! States: `Initializing` while the backlog is replayed, `Tailing` afterwards,
//! `Closed` after [`LogTailer::close`] or a lost handle. A rotated, truncated or
//! unreadable log is reported once as [`Error::LogLost`]; the tailer does not
//! re-open it.

use crate::core::error::{Error, Result};
use crate::core::events::{ConnectionEvent, Delivery, parse_bytes};
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Bytes of existing log replayed on open
pub const DEFAULT_BACKLOG_BYTES: u64 = 4096;

/// Longest line kept while waiting for its newline
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Initializing,
    Tailing,
    Closed,
}

#[cfg(unix)]
fn file_id(metadata: &Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_id(_metadata: &Metadata) -> Option<u64> {
    None
}

/// Opens the first path that can be opened, in order.
fn open_first(paths: &[PathBuf]) -> Result<(PathBuf, File)> {
    for path in paths {
        match File::open(path) {
            Ok(file) => return Ok((path.clone(), file)),
            Err(e) => debug!("Cannot open {}: {e}", path.display()),
        }
    }
    Err(Error::LogUnavailable {
        tried: paths.to_vec(),
    })
}

/// Tails one log file and hands block events to a callback
pub struct LogTailer<F>
where
    F: FnMut(&ConnectionEvent, Delivery),
{
    path: PathBuf,
    reader: Option<BufReader<File>>,
    state: TailState,
    /// Bytes consumed from the file, including `pending`
    offset: u64,
    file_id: Option<u64>,
    /// Start of a line whose newline has not arrived yet
    pending: Vec<u8>,
    /// Drop everything up to the next newline
    skip_partial: bool,
    callback: F,
}

impl<F> LogTailer<F>
where
    F: FnMut(&ConnectionEvent, Delivery),
{
    /// Opens the first usable log in `paths` and replays its backlog.
    ///
    /// Reading starts `backlog_bytes` before the end of the file. When that is
    /// not the start of the file, the first (cut) line is discarded. A failed
    /// seek is tolerated and reading starts at the current position.
    ///
    /// # Errors
    ///
    /// - [`Error::LogUnavailable`] if no path could be opened
    /// - [`Error::Io`] if the backlog could not be read
    pub fn open(paths: &[PathBuf], backlog_bytes: u64, callback: F) -> Result<Self> {
        let (path, mut file) = open_first(paths)?;
        let metadata = file.metadata()?;

        let start = metadata.len().saturating_sub(backlog_bytes);
        let offset = match file.seek(SeekFrom::Start(start)) {
            Ok(pos) => pos,
            Err(e) => {
                warn!("Cannot seek in {}: {e}; reading from the current position", path.display());
                file.stream_position().unwrap_or(0)
            }
        };

        let mut tailer = Self {
            file_id: file_id(&metadata),
            reader: Some(BufReader::new(file)),
            state: TailState::Initializing,
            offset,
            pending: Vec::new(),
            skip_partial: offset > 0,
            callback,
            path,
        };

        let replayed = tailer.read_lines(Delivery::Backlog)?;
        tailer.state = TailState::Tailing;
        info!(
            "Tailing {} from offset {offset} ({replayed} backlog events)",
            tailer.path.display()
        );
        Ok(tailer)
    }

    pub fn state(&self) -> TailState {
        self.state
    }

    /// Path of the log being tailed
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes consumed so far
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Reads every complete line appended since the last call.
    ///
    /// Returns the number of events delivered. After the tailer is closed this
    /// delivers nothing and returns `Ok(0)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LogLost`] once when the file was rotated, truncated or
    /// became unreadable; the tailer is closed afterwards.
    pub fn on_file_modified(&mut self) -> Result<usize> {
        if self.state == TailState::Closed {
            return Ok(0);
        }

        match std::fs::metadata(&self.path) {
            Err(e) => return Err(self.lose(format!("cannot stat log: {e}"))),
            Ok(meta) if self.file_id.is_some() && file_id(&meta) != self.file_id => {
                return Err(self.lose("log file was rotated".to_string()));
            }
            Ok(meta) if meta.len() < self.offset => {
                return Err(self.lose(format!(
                    "log file was truncated ({} < {} bytes)",
                    meta.len(),
                    self.offset
                )));
            }
            Ok(_) => {}
        }

        match self.read_lines(Delivery::Live) {
            Ok(delivered) => Ok(delivered),
            Err(e) => Err(self.lose(e.to_string())),
        }
    }

    /// Releases the file handle. Safe to call more than once.
    pub fn close(&mut self) {
        if self.state == TailState::Closed {
            return;
        }
        self.reader = None;
        self.pending.clear();
        self.state = TailState::Closed;
        debug!("Closed {}", self.path.display());
    }

    fn lose(&mut self, reason: String) -> Error {
        warn!("Lost firewall log {}: {reason}", self.path.display());
        self.close();
        Error::LogLost {
            path: self.path.clone(),
            reason,
        }
    }

    /// Delivers every complete line available now; keeps an unterminated tail.
    fn read_lines(&mut self, delivery: Delivery) -> Result<usize> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(0);
        };

        let mut delivered = 0;
        loop {
            let read = reader.read_until(b'\n', &mut self.pending)?;
            if read == 0 {
                break;
            }
            self.offset += read as u64;

            if self.pending.last() != Some(&b'\n') {
                if self.pending.len() > MAX_LINE_BYTES {
                    debug!("Dropping overlong log line ({} bytes)", self.pending.len());
                    self.pending.clear();
                    self.skip_partial = true;
                }
                continue;
            }

            let line = std::mem::take(&mut self.pending);
            if std::mem::replace(&mut self.skip_partial, false) {
                continue;
            }
            if let Some(event) = parse_bytes(&line) {
                (self.callback)(&event, delivery);
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}

impl<F> Drop for LogTailer<F>
where
    F: FnMut(&ConnectionEvent, Delivery),
{
    fn drop(&mut self) {
        self.close();
    }
}
