//! Synthetic instrument data
//!
//! Drives each configured signal back and forth between its bounds so a
//! display can be exercised without a simulator or a phone attached. Every
//! period the worker emits one record holding the current value of each
//! channel, then advances the walk.

use crate::core::source::TelemetrySource;
use crate::core::types::{SourcePoll, Update};
use crate::error::Result;
use crate::sources::worker::{SourceWorker, DEFAULT_CHANNEL_CAPACITY};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::{Duration, Instant};

/// One signal's sweep
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SyntheticChannel {
    pub signal: String,
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl SyntheticChannel {
    pub fn new(signal: &str, min: f64, max: f64, step: f64) -> Self {
        Self {
            signal: signal.to_string(),
            min,
            max,
            step,
        }
    }
}

/// Sweeps used for bench testing a display
pub fn default_channels() -> Vec<SyntheticChannel> {
    vec![
        SyntheticChannel::new("engine_rpm", -200.0, 3200.0, 10.0),
        SyntheticChannel::new("oil_pressure", -20.0, 450.0, 1.0),
        SyntheticChannel::new("oil_temperature", -50.0, 200.0, 1.0),
        SyntheticChannel::new("speed_ias", 0.0, 270.0, 0.1),
        SyntheticChannel::new("altitude_msl", -1000.0, 18000.0, 1.0),
        SyntheticChannel::new("att_pitch", -30.0, 30.0, 0.1),
        SyntheticChannel::new("att_roll", -60.0, 60.0, 0.1),
    ]
}

/// Walk state of one channel, starting at zero
#[derive(Debug, Clone)]
pub struct ChannelWalk {
    channel: SyntheticChannel,
    value: f64,
    step: f64,
}

impl ChannelWalk {
    pub fn new(channel: SyntheticChannel) -> Self {
        let step = channel.step;
        Self {
            channel,
            value: 0.0,
            step,
        }
    }

    /// Current value, then advance
    ///
    /// The step reverses once the value has left `[min, max]`, so the walk
    /// overshoots each bound by at most one step.
    pub fn next_value(&mut self) -> f64 {
        let current = self.value;
        if self.value < self.channel.min || self.value > self.channel.max {
            self.step = -self.step;
        }
        self.value += self.step;
        current
    }

    pub fn signal(&self) -> &str {
        &self.channel.signal
    }
}

/// Telemetry source emitting swept values on a fixed period
pub struct SyntheticSource {
    worker: SourceWorker,
}

impl SyntheticSource {
    pub fn start(channels: Vec<SyntheticChannel>, period: Duration) -> Result<Self> {
        let mut walks: Vec<ChannelWalk> = channels.into_iter().map(ChannelWalk::new).collect();
        log::info!(
            "Synthetic source: {} channels every {:?}",
            walks.len(),
            period
        );

        let worker = SourceWorker::spawn("synthetic", DEFAULT_CHANNEL_CAPACITY, move |ctx| {
            let mut next_tick = Instant::now();
            while ctx.is_running() {
                let record = walks
                    .iter_mut()
                    .map(|walk| {
                        let value = walk.next_value();
                        Update::signal(walk.signal(), value)
                    })
                    .collect();
                if !ctx.send_record(record) {
                    break;
                }

                next_tick += period;
                let now = Instant::now();
                if next_tick > now {
                    thread::sleep(next_tick - now);
                } else {
                    next_tick = now;
                }
            }
            0
        })?;

        Ok(Self { worker })
    }
}

impl TelemetrySource for SyntheticSource {
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
