//! Core data types for telemetry updates.
//!
//! Key types for source implementers:
//! - [`Update`]: One discrete reading handed to the dispatch loop
//! - [`SourceEvent`]: What a worker thread sends through its channel
//! - [`SourcePoll`]: Result of draining a source for one tick

/// Exit status reported when a worker produced none
pub const EXIT_STATUS_UNKNOWN: i32 = -1;

/// A discrete reading from a telemetry source
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Value for a schema signal, in engineering units
    Signal { name: String, value: f64 },
    /// Raw sensor sample
    ///
    /// `values` is `None` when the sensor was reported without data; the sensor
    /// still gets an id but nothing is sent for it.
    Sensor {
        name: String,
        values: Option<Vec<f64>>,
    },
}

impl Update {
    pub fn signal(name: &str, value: f64) -> Self {
        Update::Signal {
            name: name.to_string(),
            value,
        }
    }

    pub fn sensor(name: &str, values: Vec<f64>) -> Self {
        Update::Sensor {
            name: name.to_string(),
            values: Some(values),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Update::Signal { name, .. } | Update::Sensor { name, .. } => name,
        }
    }
}

/// Message from a source worker to the foreground
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// Updates decoded from one upstream record (a JSON object, a datagram, a tick)
    Record(Vec<Update>),
    /// Receive-side failure; the worker keeps running
    ReadError(String),
}

/// Outcome of one poll
#[derive(Debug, Clone, PartialEq)]
pub enum SourcePoll {
    /// Updates from the records drained this tick (possibly none)
    Updates(Vec<Update>),
    /// The worker has ended with this exit status
    Finished(i32),
}
