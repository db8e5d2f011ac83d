//! Live log watching
//!
//! [`LogWatch`] pairs a [`LogTailer`] with a `notify` watcher. The watcher's
//! callback runs on notify's own thread and forwards file events into a tokio
//! channel with `blocking_send`; [`LogWatch::run`] consumes that channel on the
//! runtime and calls [`LogTailer::on_file_modified`]. It also re-checks the file
//! every [`POLL_INTERVAL`] so appends are picked up where inotify is unavailable.
//!
//! Event callbacks run inside [`LogWatch::run`], one at a time.

use crate::core::error::Result;
use crate::core::events::{ConnectionEvent, Delivery};
use crate::core::tailer::LogTailer;
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Fallback interval between log checks without file events
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Pending file events before notify's thread waits for the consumer
const EVENT_QUEUE: usize = 64;

/// File watcher driving a [`LogTailer`]
pub struct LogWatch<F>
where
    F: FnMut(&ConnectionEvent, Delivery),
{
    tailer: LogTailer<F>,
    /// Dropping it stops notify's thread
    watcher: RecommendedWatcher,
    event_rx: mpsc::Receiver<notify::Result<Event>>,
}

impl<F> LogWatch<F>
where
    F: FnMut(&ConnectionEvent, Delivery),
{
    /// Starts watching the tailer's file.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Watch`] if the file watcher cannot be created.
    pub fn new(tailer: LogTailer<F>) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                // Receiver gone means the watch is shutting down
                let _ = event_tx.blocking_send(res);
            },
            NotifyConfig::default().with_poll_interval(POLL_INTERVAL),
        )?;
        watcher.watch(tailer.path(), RecursiveMode::NonRecursive)?;
        info!(path = %tailer.path().display(), "watching log");

        Ok(Self {
            tailer,
            watcher,
            event_rx,
        })
    }

    /// Waits for a file event or the poll interval, then reads what was
    /// appended. Returns the number of events delivered.
    ///
    /// # Errors
    ///
    /// Returns the tailer's error when the log is lost; the tailer is closed
    /// afterwards and later calls deliver nothing.
    pub async fn process_events(&mut self) -> Result<usize> {
        tokio::select! {
            event = self.event_rx.recv() => match event {
                Some(Ok(event)) if matches!(event.kind, EventKind::Access(_)) => return Ok(0),
                Some(Ok(event)) => debug!(kind = ?event.kind, "log event"),
                Some(Err(e)) => warn!(error = %e, "file watcher error"),
                None => debug!("file watcher channel closed"),
            },
            () = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        match self.tailer.on_file_modified() {
            Ok(0) => Ok(0),
            Ok(n) => {
                debug!("Delivered {n} events");
                Ok(n)
            }
            Err(e) => {
                error!("Stopping log watch: {e}");
                Err(e)
            }
        }
    }

    /// Delivers events until the log is lost.
    ///
    /// Runs until cancelled; drop the future (for example from a
    /// `tokio::select!` branch) to stop watching.
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.process_events().await?;
        }
    }

    pub fn tailer(&self) -> &LogTailer<F> {
        &self.tailer
    }

    /// Stops the watcher and closes the log.
    pub fn stop(mut self) {
        drop(self.watcher);
        self.tailer.close();
        debug!("Log watch stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::core::tailer::{DEFAULT_BACKLOG_BYTES, TailState};
    use std::io::Write;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const LINE: &str = "Oct 19 12:00:00 host kernel: [UFW BLOCK] IN=eth0 OUT= \
        SRC=203.0.113.9 DST=192.0.2.1 PROTO=UDP SPT=53 DPT=5353\n";

    #[tokio::test]
    async fn test_appended_line_reaches_callback() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ufw.log");
        std::fs::write(&path, "").unwrap();

        let seen: Arc<Mutex<Vec<(String, Delivery)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let tailer = LogTailer::open(&[path.clone()], DEFAULT_BACKLOG_BYTES, move |event, delivery| {
            sink.lock()
                .unwrap()
                .push((event.source().to_string(), delivery));
        })
        .unwrap();
        let mut watch = LogWatch::new(tailer).unwrap();

        std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .unwrap()
            .write_all(LINE.as_bytes())
            .unwrap();

        let delivered = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if watch.process_events().await.unwrap() > 0 {
                    break;
                }
            }
        })
        .await;
        assert!(delivered.is_ok());
        assert_eq!(
            *seen.lock().unwrap(),
            [("203.0.113.9".to_string(), Delivery::Live)]
        );

        watch.stop();
    }

    #[tokio::test]
    async fn test_lost_log_ends_run() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ufw.log");
        std::fs::write(&path, LINE.repeat(4)).unwrap();

        let tailer = LogTailer::open(&[path.clone()], DEFAULT_BACKLOG_BYTES, |_, _| {}).unwrap();
        let watch = LogWatch::new(tailer).unwrap();

        std::fs::write(&path, "").unwrap();

        let outcome = tokio::time::timeout(Duration::from_secs(10), watch.run())
            .await
            .unwrap();
        assert!(matches!(outcome, Err(Error::LogLost { .. })));
    }

    #[tokio::test]
    async fn test_stop_closes_the_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ufw.log");
        std::fs::write(&path, LINE).unwrap();

        let tailer = LogTailer::open(&[path], DEFAULT_BACKLOG_BYTES, |_, _| {}).unwrap();
        let watch = LogWatch::new(tailer).unwrap();
        assert_eq!(watch.tailer().state(), TailState::Tailing);
        watch.stop();
    }

    #[tokio::test]
    async fn test_run_stops_when_cancelled() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ufw.log");
        std::fs::write(&path, LINE).unwrap();

        let tailer = LogTailer::open(&[path], DEFAULT_BACKLOG_BYTES, |_, _| {}).unwrap();
        let watch = LogWatch::new(tailer).unwrap();

        let stopped = tokio::select! {
            _ = watch.run() => false,
            () = tokio::time::sleep(Duration::from_millis(50)) => true,
        };
        assert!(stopped);
    }
}
