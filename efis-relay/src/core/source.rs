//! TelemetrySource trait definition

use crate::core::types::SourcePoll;
use crate::error::Result;

/// A feed of discrete telemetry updates
///
/// Implementations do their blocking I/O on a worker thread; `poll` must
/// return promptly.
pub trait TelemetrySource: Send {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Drain at most `max_batch` upstream records
    ///
    /// Returns `Err(Error::SourceRead)` for a receive-side failure the caller
    /// may log and retry on the next cycle. Once the worker has ended every
    /// call returns `SourcePoll::Finished` with the same status.
    fn poll(&mut self, max_batch: usize) -> Result<SourcePoll>;

    /// Stop the worker and return its exit status
    ///
    /// Idempotent and safe after natural completion.
    fn stop(&mut self) -> i32;
}
