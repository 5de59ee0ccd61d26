// # Journal Log Source
//
// This crate provides a systemd journal log source for the blackhole daemon.
//
// ## Architecture
//
// `watch()` spawns
//
// ```text
// journalctl --follow --lines=<replay> --identifier=sshd --output=cat --directory=<journal>
// ```
//
// and a reader task that forwards each non-empty, trimmed stdout line into a
// bounded channel. The engine consumes the other end. Lines are decoded
// lossily, so bytes that are not UTF-8 never stop the reader.
//
// ## Backpressure
//
// The reader awaits `send()` on the bounded channel. While the engine is
// busy the reader stops reading, the pipe fills and journalctl blocks.
// Lines are never dropped.
//
// ## Shutdown
//
// The reader task ends when journalctl exits or when the engine drops the
// stream. The child is spawned with `kill_on_drop`, so it never outlives the
// reader.

use blackhole_core::config::LogSourceConfig;
use blackhole_core::traits::{LogLines, LogSource};
use blackhole_core::{Error, Result};

use std::ffi::OsString;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

/// Program used to follow the journal
const JOURNALCTL: &str = "journalctl";

/// Log source following the systemd journal
pub struct JournalLogSource {
    /// Program to run
    program: OsString,

    /// Arguments passed to the program
    args: Vec<OsString>,

    /// Capacity of the line queue
    queue_capacity: usize,
}

impl JournalLogSource {
    /// Create a journal source for `config`
    ///
    /// # Parameters
    ///
    /// - `config`: journal directory, identifier and replay depth
    /// - `queue_capacity`: bound of the queue between reader and engine
    pub fn new(config: &LogSourceConfig, queue_capacity: usize) -> Result<Self> {
        config.validate()?;
        Self::with_command(JOURNALCTL, journalctl_args(config), queue_capacity)
    }

    /// Follow the stdout of an arbitrary command instead of journalctl
    pub fn with_command<I, S>(
        program: impl Into<OsString>,
        args: I,
        queue_capacity: usize,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        if queue_capacity == 0 {
            return Err(Error::config("Queue capacity must be > 0"));
        }

        Ok(Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            queue_capacity,
        })
    }

    /// Command line that `watch()` runs (for logging)
    pub fn command_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(&self.args)
            .map(|s| s.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Arguments for `journalctl` following the configured identifier
pub fn journalctl_args(config: &LogSourceConfig) -> Vec<OsString> {
    let mut directory = OsString::from("--directory=");
    directory.push(&config.journal_path);

    vec![
        OsString::from("--follow"),
        OsString::from(format!("--lines={}", config.replay_lines)),
        OsString::from(format!("--identifier={}", config.identifier)),
        OsString::from("--output=cat"),
        directory,
    ]
}

impl LogSource for JournalLogSource {
    fn watch(&self) -> Result<LogLines> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::log_source(format!("failed to spawn '{}': {}", self.command_line(), e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::log_source("journal reader has no stdout"))?;

        info!(command = %self.command_line(), "Following journal");

        let (tx, rx) = mpsc::channel(self.queue_capacity);
        tokio::spawn(forward_lines(child, stdout, tx));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn source_name(&self) -> &'static str {
        "journal"
    }
}

/// Copy lines from `stdout` into `tx` until either side goes away
async fn forward_lines(mut child: Child, stdout: ChildStdout, tx: mpsc::Sender<String>) {
    let mut segments = BufReader::new(stdout).split(b'\n');

    loop {
        tokio::select! {
            segment = segments.next_segment() => match segment {
                Ok(Some(bytes)) => {
                    let line = String::from_utf8_lossy(&bytes);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    if tx.send(line.to_string()).await.is_err() {
                        debug!("Log consumer gone, stopping journal reader");
                        return;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read journal output");
                    break;
                }
            },

            _ = tx.closed() => {
                debug!("Log consumer gone, stopping journal reader");
                return;
            }
        }
    }

    match child.wait().await {
        Ok(status) => warn!(%status, "Journal reader exited"),
        Err(e) => warn!(error = %e, "Failed to wait for journal reader"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;
    use tokio_stream::StreamExt;

    #[test]
    fn test_journalctl_args() {
        let config = LogSourceConfig {
            journal_path: PathBuf::from("/var/log/journal"),
            identifier: "sshd".to_string(),
            replay_lines: 1,
        };

        let args: Vec<String> = journalctl_args(&config)
            .into_iter()
            .map(|s| s.into_string().unwrap())
            .collect();

        assert_eq!(
            args,
            vec![
                "--follow",
                "--lines=1",
                "--identifier=sshd",
                "--output=cat",
                "--directory=/var/log/journal",
            ]
        );
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(JournalLogSource::with_command("cat", ["/dev/null"], 0).is_err());
    }

    #[test]
    fn test_command_line() {
        let source = JournalLogSource::new(&LogSourceConfig::default(), 10).unwrap();
        assert!(source.command_line().starts_with("journalctl --follow --lines=1"));
    }

    #[tokio::test]
    async fn test_lines_are_trimmed_and_blank_lines_skipped() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  Failed password for root from 192.0.2.1 port 22 ssh2  ").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "   ").unwrap();
        writeln!(file, "Connection closed by 192.0.2.1 port 22").unwrap();
        file.flush().unwrap();

        let source = JournalLogSource::with_command("cat", [file.path()], 2).unwrap();
        let lines: Vec<String> = source.watch().unwrap().collect().await;

        assert_eq!(
            lines,
            vec![
                "Failed password for root from 192.0.2.1 port 22 ssh2",
                "Connection closed by 192.0.2.1 port 22",
            ]
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_does_not_stop_reader() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"bad \xff byte\n").unwrap();
        writeln!(file, "Failed password for root from 192.0.2.1 port 22 ssh2").unwrap();
        file.flush().unwrap();

        let source = JournalLogSource::with_command("cat", [file.path()], 4).unwrap();
        let lines: Vec<String> = source.watch().unwrap().collect().await;

        assert_eq!(
            lines,
            vec![
                "bad \u{FFFD} byte",
                "Failed password for root from 192.0.2.1 port 22 ssh2",
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_ends_when_command_exits() {
        let source = JournalLogSource::with_command("cat", ["/dev/null"], 1).unwrap();
        let mut lines = source.watch().unwrap();
        assert_eq!(lines.next().await, None);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_log_source_error() {
        let source =
            JournalLogSource::with_command("/nonexistent/journalctl", Vec::<String>::new(), 1).unwrap();
        assert!(matches!(source.watch(), Err(Error::LogSource(_))));
    }
}
