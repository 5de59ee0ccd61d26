// # Log Source Trait
//
// Defines the interface for the stream of raw log lines fed to the engine.
//
// ## Backpressure
//
// Implementations forward lines through a bounded channel. When the engine
// falls behind, the producer waits for room instead of dropping lines.
//
// ## Implementations
//
// - systemd journal: `blackhole-journal` crate
//
// ## Usage
//
// ```rust,ignore
// use blackhole_core::LogSource;
// use tokio_stream::StreamExt;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let source = /* LogSource implementation */;
//
//     let mut lines = source.watch()?;
//     while let Some(line) = lines.next().await {
//         println!("{}", line);
//     }
//
//     Ok(())
// }
// ```

use std::pin::Pin;
use tokio_stream::Stream;

/// Stream of raw log lines
pub type LogLines = Pin<Box<dyn Stream<Item = String> + Send + 'static>>;

/// Trait for log source implementations
///
/// A log source delivers lines that are already filtered down to the SSH
/// daemon. It does not interpret them.
///
/// The stream ends only when the underlying source is gone; the engine
/// treats that as fatal.
pub trait LogSource: Send + Sync {
    /// Start following the log
    ///
    /// Called once per engine run. Failing to reach the underlying log is
    /// reported here, before any line is delivered.
    fn watch(&self) -> Result<LogLines, crate::Error>;

    /// Source name (for logging)
    fn source_name(&self) -> &'static str;
}
