//! Background worker shared by all telemetry sources
//!
//! Each source runs its blocking reads on one named thread. Decoded records go
//! to the foreground through a bounded crossbeam channel; when the channel is
//! full the worker waits instead of dropping data, so a backlog is drained a
//! few records per tick. Cancellation is a shared flag plus an optional
//! interrupt hook that unblocks the worker (e.g. signalling a subprocess).
//! The worker's exit status is its thread's return value.

use crate::core::types::{SourceEvent, SourcePoll, Update, EXIT_STATUS_UNKNOWN};
use crate::error::{Error, Result};
use crossbeam_channel::{bounded, Receiver, SendTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Records buffered between worker and foreground
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// How often a worker blocked on a full channel re-checks for shutdown
const SEND_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Hook run once on stop to unblock the worker
pub type InterruptFn = Box<dyn FnMut() + Send>;

/// Worker-side handle: emit events, observe cancellation
#[derive(Clone)]
pub struct WorkerContext {
    events: Sender<SourceEvent>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerContext {
    /// False once stop has been requested
    pub fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
    }

    /// Hand one record to the foreground, waiting while the channel is full
    ///
    /// Returns false if the worker should exit (stopped or foreground gone).
    pub fn send_record(&self, updates: Vec<Update>) -> bool {
        self.send(SourceEvent::Record(updates))
    }

    /// Report a receive-side failure
    pub fn send_read_error(&self, message: String) -> bool {
        self.send(SourceEvent::ReadError(message))
    }

    fn send(&self, mut event: SourceEvent) -> bool {
        loop {
            if !self.is_running() {
                return false;
            }
            match self.events.send_timeout(event, SEND_RETRY_INTERVAL) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(e)) => event = e,
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }
}

/// Foreground-side handle to a running worker
pub struct SourceWorker {
    name: String,
    events: Receiver<SourceEvent>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<i32>>,
    interrupt: Option<InterruptFn>,
    pending_error: Option<String>,
    exit_status: Option<i32>,
}

impl SourceWorker {
    /// Start `body` on a new thread named `name`
    pub fn spawn<F>(name: &str, capacity: usize, body: F) -> Result<Self>
    where
        F: FnOnce(WorkerContext) -> i32 + Send + 'static,
    {
        let (tx, rx) = bounded(capacity.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let ctx = WorkerContext {
            events: tx,
            shutdown: Arc::clone(&shutdown),
        };

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(ctx))
            .map_err(|e| Error::Spawn(format!("{} worker: {}", name, e)))?;

        log::debug!("Started {} worker", name);

        Ok(Self {
            name: name.to_string(),
            events: rx,
            shutdown,
            handle: Some(handle),
            interrupt: None,
            pending_error: None,
            exit_status: None,
        })
    }

    /// Install the hook run on stop
    pub fn with_interrupt(mut self, interrupt: InterruptFn) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drain up to `max_batch` records
    pub fn poll(&mut self, max_batch: usize) -> Result<SourcePoll> {
        if let Some(status) = self.exit_status {
            return Ok(SourcePoll::Finished(status));
        }
        if let Some(message) = self.pending_error.take() {
            return Err(Error::SourceRead(message));
        }

        let mut updates = Vec::new();
        let mut records = 0;
        while records < max_batch {
            match self.events.try_recv() {
                Ok(SourceEvent::Record(batch)) => {
                    updates.extend(batch);
                    records += 1;
                }
                Ok(SourceEvent::ReadError(message)) => {
                    if records == 0 {
                        return Err(Error::SourceRead(message));
                    }
                    // Deliver what was drained first
                    self.pending_error = Some(message);
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if records == 0 {
                        return Ok(SourcePoll::Finished(self.stop()));
                    }
                    break;
                }
            }
        }

        Ok(SourcePoll::Updates(updates))
    }

    /// Request shutdown, interrupt, join and return the exit status
    pub fn stop(&mut self) -> i32 {
        if let Some(status) = self.exit_status {
            return status;
        }

        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(mut interrupt) = self.interrupt.take() {
            interrupt();
        }

        let status = match self.handle.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                log::error!("{} worker panicked", self.name);
                EXIT_STATUS_UNKNOWN
            }),
            None => EXIT_STATUS_UNKNOWN,
        };

        log::info!("{} worker stopped with status {}", self.name, status);
        self.exit_status = Some(status);
        status
    }
}

impl Drop for SourceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
