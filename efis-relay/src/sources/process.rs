//! Sensor subprocess source
//!
//! Runs a sensor reporting command (e.g. `termux-sensor`) and tails its
//! stdout. The command prints one JSON object per sample, spread over several
//! lines, with the opening and closing braces alone on their lines:
//!
//! ```text
//! {
//!   "3-axis Accelerometer": {
//!     "values": [0.12, 9.79, 0.33]
//!   },
//!   "Game Rotation Vector": {
//!     "values": [0.01, -0.02, 0.70, 0.71]
//!   }
//! }
//! ```
//!
//! Each object becomes one record of `Update::Sensor` entries. Fragments that
//! fail to decode are skipped. Stopping sends SIGINT to the child and reports
//! its exit code; a child still running after a grace period is killed along
//! with its process group and reports `-1`.

use crate::core::source::TelemetrySource;
use crate::core::types::{SourcePoll, Update, EXIT_STATUS_UNKNOWN};
use crate::error::{Error, Result};
use crate::sources::worker::{SourceWorker, WorkerContext, DEFAULT_CHANNEL_CAPACITY};
use parking_lot::Mutex;
use serde::Deserialize;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Poll interval while waiting for the child to exit
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How long an interrupted child gets to exit before it is killed
const STOP_GRACE_PERIOD: Duration = Duration::from_millis(1500);

/// Payload of one sensor inside a sample object
#[derive(Debug, Deserialize)]
struct SensorEntry {
    #[serde(default)]
    values: Option<Vec<f64>>,
}

/// Reassembles brace-delimited JSON objects from a line stream
#[derive(Debug, Default)]
pub struct JsonObjectAssembler {
    lines: Option<Vec<String>>,
}

impl JsonObjectAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its newline); returns a complete object's text
    ///
    /// A lone `{` always starts a new object, discarding any unfinished one.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        if line == "{" {
            self.lines = Some(Vec::new());
        }

        let lines = self.lines.as_mut()?;
        lines.push(line.to_string());

        if line == "}" {
            return self.lines.take().map(|l| l.join("\n"));
        }
        None
    }
}

/// Decode one sample object into sensor updates, in document order
pub fn parse_sample(text: &str) -> serde_json::Result<Vec<Update>> {
    let sample: serde_json::Map<String, serde_json::Value> = serde_json::from_str(text)?;
    sample
        .into_iter()
        .map(|(name, value)| {
            let entry: SensorEntry = serde_json::from_value(value)?;
            Ok(Update::Sensor {
                name,
                values: entry.values,
            })
        })
        .collect()
}

/// Telemetry source backed by a sensor subprocess
pub struct ProcessSource {
    worker: SourceWorker,
}

impl ProcessSource {
    /// Spawn `command` (program followed by arguments) and start tailing it
    pub fn spawn(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("sensor command is empty".to_string()))?;

        let mut command = Command::new(program);
        command.args(args).stdout(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own group, so a kill also reaches helpers holding our stdout pipe
            command.process_group(0);
        }

        let mut child = command
            .spawn()
            .map_err(|e| Error::Spawn(format!("{}: {}", program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(format!("{}: stdout not captured", program)))?;

        log::info!("Started sensor process {} (pid {})", program, child.id());

        let child = Arc::new(Mutex::new(child));
        let worker_child = Arc::clone(&child);
        let worker = SourceWorker::spawn("sensor-process", DEFAULT_CHANNEL_CAPACITY, move |ctx| {
            read_loop(stdout, &ctx);
            wait_for_exit(&worker_child)
        })?
        .with_interrupt(Box::new(move || interrupt(&child)));

        Ok(Self { worker })
    }
}

impl TelemetrySource for ProcessSource {
    fn name(&self) -> &str {
        self.worker.name()
    }

    fn poll(&mut self, max_batch: usize) -> Result<SourcePoll> {
        self.worker.poll(max_batch)
    }

    fn stop(&mut self) -> i32 {
        self.worker.stop()
    }
}

/// Tail `stdout` until EOF, a read error or shutdown
fn read_loop<R: Read>(stdout: R, ctx: &WorkerContext) {
    let mut reader = BufReader::new(stdout);
    let mut assembler = JsonObjectAssembler::new();
    let mut buf = Vec::new();

    while ctx.is_running() {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => {
                log::info!("Sensor process closed its output");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                log::warn!("Sensor process read failed: {}", e);
                break;
            }
        }

        let line = String::from_utf8_lossy(&buf);
        let line = line.trim_end_matches(&['\n', '\r'][..]);
        let Some(object) = assembler.push_line(line) else {
            continue;
        };

        match parse_sample(&object) {
            Ok(updates) => {
                if !ctx.send_record(updates) {
                    break;
                }
            }
            Err(e) => log::debug!("Skipping malformed sensor sample: {}", e),
        }
    }
}

/// Reap the child without holding its lock across the wait
fn wait_for_exit(child: &Mutex<Child>) -> i32 {
    loop {
        let state = child.lock().try_wait();
        match state {
            Ok(Some(status)) => return status.code().unwrap_or(EXIT_STATUS_UNKNOWN),
            Ok(None) => thread::sleep(EXIT_POLL_INTERVAL),
            Err(e) => {
                log::error!("Failed to wait for sensor process: {}", e);
                return EXIT_STATUS_UNKNOWN;
            }
        }
    }
}

/// Ask a still-running child to exit, killing it after the grace period
fn interrupt(child: &Mutex<Child>) {
    if !signal_if_running(child, Signal::Interrupt) {
        return;
    }

    let deadline = Instant::now() + STOP_GRACE_PERIOD;
    while Instant::now() < deadline {
        thread::sleep(EXIT_POLL_INTERVAL);
        match child.lock().try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(e) => {
                log::warn!("Failed to query sensor process: {}", e);
                break;
            }
        }
    }

    log::warn!(
        "Sensor process still running after {:?}, killing it",
        STOP_GRACE_PERIOD
    );
    signal_if_running(child, Signal::Kill);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Interrupt,
    Kill,
}

/// Deliver `signal` unless the child has already exited; returns whether it was running
///
/// The lock is held from the liveness check to the signal, so the worker
/// cannot reap the child in between.
fn signal_if_running(child: &Mutex<Child>, signal: Signal) -> bool {
    let mut child = child.lock();
    match child.try_wait() {
        Ok(None) => {}
        Ok(Some(_)) => return false,
        Err(e) => {
            log::warn!("Failed to query sensor process: {}", e);
            return false;
        }
    }

    #[cfg(unix)]
    {
        let pid = child.id() as libc::pid_t;
        let (target, signo) = match signal {
            Signal::Interrupt => (pid, libc::SIGINT),
            // Negative pid: the whole process group
            Signal::Kill => (-pid, libc::SIGKILL),
        };
        // SAFETY: pid belongs to our un-reaped child, so it cannot have been recycled
        if unsafe { libc::kill(target, signo) } != 0 {
            log::warn!(
                "Failed to signal sensor process: {}",
                std::io::Error::last_os_error()
            );
        }
    }
    #[cfg(not(unix))]
    {
        // No SIGINT here; both requests terminate
        let _ = signal;
        if let Err(e) = child.kill() {
            log::warn!("Failed to kill sensor process: {}", e);
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_collects_object() {
        let mut asm = JsonObjectAssembler::new();
        assert_eq!(asm.push_line("noise before"), None);
        assert_eq!(asm.push_line("{"), None);
        assert_eq!(asm.push_line("  \"a\": {\"values\": [1]}"), None);
        assert_eq!(
            asm.push_line("}").as_deref(),
            Some("{\n  \"a\": {\"values\": [1]}\n}")
        );
        assert_eq!(asm.push_line("}"), None);
    }

    #[test]
    fn test_assembler_restarts_on_open_brace() {
        let mut asm = JsonObjectAssembler::new();
        asm.push_line("{");
        asm.push_line("\"partial\": ");
        asm.push_line("{");
        let text = asm.push_line("}").unwrap();
        assert_eq!(text, "{\n}");
    }

    #[test]
    fn test_parse_sample() {
        let text = r#"{
  "Game Rotation Vector": { "values": [0.5, -0.25, 0.0, 1.0] },
  "3-axis Accelerometer": { "values": [0.1, 9.8, 0.3] },
  "Light": {}
}"#;
        let updates = parse_sample(text).unwrap();
        assert_eq!(
            updates,
            vec![
                Update::sensor("Game Rotation Vector", vec![0.5, -0.25, 0.0, 1.0]),
                Update::sensor("3-axis Accelerometer", vec![0.1, 9.8, 0.3]),
                Update::Sensor {
                    name: "Light".to_string(),
                    values: None
                },
            ]
        );
    }

    #[test]
    fn test_parse_sample_rejects_garbage() {
        assert!(parse_sample("{\n\"a\": [1,\n}").is_err());
        assert!(parse_sample("{\"a\": {\"values\": [\"x\"]}}").is_err());
    }

    #[test]
    fn test_empty_command() {
        assert!(matches!(ProcessSource::spawn(&[]), Err(Error::Config(_))));
    }

    #[test]
    fn test_missing_program() {
        let cmd = vec!["/nonexistent/efis-sensor-tool".to_string()];
        assert!(matches!(ProcessSource::spawn(&cmd), Err(Error::Spawn(_))));
    }
}
