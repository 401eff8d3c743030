//! Dispatch loop
//!
//! Drains a telemetry source once per tick and turns its updates into
//! packets:
//!
//! ```text
//! Update::Signal ──► heading fold ──► AnalogPacketDefinition ──► analog fan-out
//! Update::Sensor ──► SensorSet ──┬──► dirty readings, one frame ──► sensor fan-out
//!                                └──► derived elements ──► analog fan-out
//! ```
//!
//! Nothing here is fatal: an update that cannot be encoded costs one packet,
//! a read error costs one tick. The loop ends when the source finishes or the
//! running flag clears.

use crate::codec::analog::{AnalogPacketDefinition, Clock, SubsecondClock};
use crate::codec::sensor::{SensorIdTable, SensorSet};
use crate::config::{AppConfig, DerivedSignal};
use crate::core::source::TelemetrySource;
use crate::core::types::{SourcePoll, Update};
use crate::error::Result;
use crate::schema::SignalRegistry;
use crate::streaming::UdpFanout;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Fold a heading into [-180, 180] degrees
pub fn normalize_heading(degrees: f64) -> f64 {
    let folded = if degrees > 180.0 {
        degrees - 360.0
    } else {
        degrees
    };
    folded.clamp(-180.0, 180.0)
}

/// Running totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Analog packets handed to the fan-out
    pub analog_packets: u64,
    /// Sensor frames handed to the fan-out
    pub sensor_frames: u64,
    /// Updates dropped because they could not be encoded
    pub encode_failures: u64,
    /// Signal updates naming nothing in the schema
    pub unknown_signals: u64,
    /// Source read errors
    pub read_errors: u64,
}

/// Routes source updates to the display network
pub struct Dispatcher {
    bindings: HashMap<String, AnalogPacketDefinition>,
    clock: Box<dyn Clock>,
    heading_signals: HashSet<String>,
    derived: Vec<DerivedSignal>,
    sensors: SensorSet,
    analog_out: UdpFanout,
    sensor_out: UdpFanout,
    max_batch: usize,
    tick: Duration,
    stats_interval: Option<Duration>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Bind every schema signal for this device and open the output sockets
    ///
    /// Heading and derived signal names must exist in the registry.
    pub fn new(
        config: &AppConfig,
        registry: &SignalRegistry,
        id_table: Arc<SensorIdTable>,
    ) -> Result<Self> {
        let sender_id = config.device.sender_id;
        let bindings = registry
            .iter()
            .map(|signal| -> Result<(String, AnalogPacketDefinition)> {
                let binding = AnalogPacketDefinition::from_signal(sender_id, signal)?;
                Ok((signal.name.clone(), binding))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        for name in &config.dispatch.heading_signals {
            registry.require(name)?;
        }
        for derived in &config.dispatch.derived {
            registry.require(&derived.signal)?;
        }

        let network = &config.network;
        let analog_out = UdpFanout::new(&network.targets(network.analog_port))?;
        let sensor_out = UdpFanout::new(&network.targets(network.sensor_port))?;
        log::info!(
            "Dispatching {} signals as device {} to {:?} (sensors to {:?})",
            bindings.len(),
            sender_id,
            analog_out.targets(),
            sensor_out.targets()
        );

        Ok(Self {
            bindings,
            clock: Box::new(SubsecondClock),
            heading_signals: config.dispatch.heading_signals.iter().cloned().collect(),
            derived: config.dispatch.derived.clone(),
            sensors: SensorSet::new(id_table),
            analog_out,
            sensor_out,
            max_batch: config.dispatch.max_batch,
            tick: config.dispatch.tick(),
            stats_interval: config.dispatch.stats_interval(),
            stats: DispatchStats::default(),
        })
    }

    /// Replace the timestamp source
    pub fn with_clock(mut self, clock: Box<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    pub fn sensors(&self) -> &SensorSet {
        &self.sensors
    }

    /// Route one update
    ///
    /// Sensor readings are only collected here; [`flush_sensors`](Self::flush_sensors)
    /// sends them.
    pub fn handle(&mut self, update: Update) {
        match update {
            Update::Signal { name, value } => self.send_signal(&name, value),
            Update::Sensor { name, values } => self.record_sensor(&name, values),
        }
    }

    /// Send every reading changed since the last flush as one frame
    pub fn flush_sensors(&mut self) {
        if !self.sensors.has_dirty() {
            return;
        }
        let frame = self.sensors.encode_dirty();
        if frame.is_empty() {
            return;
        }
        self.sensor_out.send(&frame);
        self.stats.sensor_frames += 1;
        log::trace!("Sent {} byte sensor frame", frame.len());
    }

    /// Run until the source finishes or `running` clears; returns the source's exit status
    pub fn run(&mut self, source: &mut dyn TelemetrySource, running: &AtomicBool) -> i32 {
        log::info!("Relaying from {} source", source.name());
        let mut last_stats = Instant::now();

        while running.load(Ordering::Relaxed) {
            match source.poll(self.max_batch) {
                Ok(SourcePoll::Updates(updates)) => {
                    for update in updates {
                        self.handle(update);
                    }
                    self.flush_sensors();
                }
                Ok(SourcePoll::Finished(status)) => {
                    log::info!("{} source finished", source.name());
                    self.log_stats();
                    return status;
                }
                Err(e) => {
                    self.stats.read_errors += 1;
                    log::warn!("{} source: {}", source.name(), e);
                }
            }

            if let Some(interval) = self.stats_interval {
                if last_stats.elapsed() >= interval {
                    self.log_stats();
                    last_stats = Instant::now();
                }
            }

            thread::sleep(self.tick);
        }

        log::info!("Stopping {} source", source.name());
        let status = source.stop();
        self.log_stats();
        status
    }

    fn send_signal(&mut self, name: &str, value: f64) {
        let Some(binding) = self.bindings.get(name) else {
            self.stats.unknown_signals += 1;
            log::debug!("No signal named {} in the schema", name);
            return;
        };

        let value = if self.heading_signals.contains(name) {
            normalize_heading(value)
        } else {
            value
        };

        match binding.encode(value, self.clock.as_ref()) {
            Ok(packet) => {
                self.analog_out.send(&packet);
                self.stats.analog_packets += 1;
            }
            Err(e) => {
                self.stats.encode_failures += 1;
                log::warn!("Skipping {} = {}: {}", name, value, e);
            }
        }
    }

    fn record_sensor(&mut self, name: &str, values: Option<Vec<f64>>) {
        let Some(values) = values else {
            // Reported without data: assign an id, send nothing
            if let Err(e) = self.sensors.observe(name) {
                self.stats.encode_failures += 1;
                log::warn!("Ignoring sensor {}: {}", name, e);
            }
            return;
        };

        let derived: Vec<(String, f64)> = self
            .derived
            .iter()
            .filter(|d| d.sensor == name)
            .filter_map(|d| values.get(d.element).map(|v| (d.signal.clone(), v * d.scale)))
            .collect();

        if let Err(e) = self.sensors.update(name, values) {
            self.stats.encode_failures += 1;
            log::warn!("Ignoring sensor {}: {}", name, e);
            return;
        }

        for (signal, value) in derived {
            self.send_signal(&signal, value);
        }
    }

    fn log_stats(&self) {
        let s = &self.stats;
        log::info!(
            "Sent {} analog packets, {} sensor frames ({} encode failures, {} unknown signals, {} read errors, {} send failures)",
            s.analog_packets,
            s.sensor_frames,
            s.encode_failures,
            s.unknown_signals,
            s.read_errors,
            self.analog_out.failures() + self.sensor_out.failures()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::analog::FixedClock;
    use crate::error::Error;
    use std::net::UdpSocket;

    const SCHEMA: &str = "1,0,0\n\
        30,5,att_pitch,deg,fixed,1000,0.001\n\
        30,6,att_roll,deg,fixed,1000,0.001\n\
        30,7,heading_true,deg,fixed,1000,0.01\n\
        30,8,heading_mag,deg,fixed,1000,0.01\n\
        10,1,engine_rpm,rpm,fixed,1000,1\n";

    struct Harness {
        dispatcher: Dispatcher,
        analog: UdpSocket,
        sensor: UdpSocket,
    }

    fn listener() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(500)))
            .unwrap();
        socket
    }

    fn harness() -> Harness {
        let analog = listener();
        let sensor = listener();
        let mut config = AppConfig::default();
        config.network.analog_port = analog.local_addr().unwrap().port();
        config.network.sensor_port = sensor.local_addr().unwrap().port();

        let registry = SignalRegistry::parse(SCHEMA).unwrap();
        let dispatcher = Dispatcher::new(&config, &registry, Arc::new(SensorIdTable::new()))
            .unwrap()
            .with_clock(Box::new(FixedClock(0x0102_0304)));
        Harness {
            dispatcher,
            analog,
            sensor,
        }
    }

    fn recv(socket: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 512];
        let (len, _) = socket.recv_from(&mut buf).unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn test_normalize_heading() {
        assert_eq!(normalize_heading(270.0), -90.0);
        assert_eq!(normalize_heading(180.0), 180.0);
        assert_eq!(normalize_heading(-45.0), -45.0);
        assert_eq!(normalize_heading(600.0), 180.0);
        assert_eq!(normalize_heading(-200.0), -180.0);
    }

    #[test]
    fn test_signal_update_sends_analog_packet() {
        let mut h = harness();
        h.dispatcher.handle(Update::signal("att_pitch", 2.5));

        assert_eq!(
            recv(&h.analog),
            vec![30, 0x01, 0x02, 0x03, 0x04, 30, 5, 0x00, 0x00, 0x09, 0xC4, 0x00]
        );
        assert_eq!(h.dispatcher.stats().analog_packets, 1);
    }

    #[test]
    fn test_heading_is_folded() {
        let mut h = harness();
        h.dispatcher.handle(Update::signal("heading_true", 270.0));
        let packet = recv(&h.analog);
        let counts = i32::from_be_bytes([packet[7], packet[8], packet[9], packet[10]]);
        assert_eq!(counts, -9000);
    }

    #[test]
    fn test_unknown_and_unencodable_signals_are_skipped() {
        let mut h = harness();
        h.dispatcher.handle(Update::signal("flap_position", 1.0));
        h.dispatcher.handle(Update::signal("engine_rpm", f64::NAN));
        h.dispatcher.handle(Update::signal("engine_rpm", 2400.0));

        let packet = recv(&h.analog);
        assert_eq!(&packet[5..7], &[10, 1]);
        let stats = h.dispatcher.stats();
        assert_eq!(stats.unknown_signals, 1);
        assert_eq!(stats.encode_failures, 1);
        assert_eq!(stats.analog_packets, 1);
    }

    #[test]
    fn test_sensor_frame_and_derived_attitude() {
        let mut h = harness();
        h.dispatcher.handle(Update::sensor(
            "Game Rotation Vector",
            vec![0.5, -0.25, 0.0, 1.0],
        ));

        // Derived pitch and roll go out immediately
        let pitch = recv(&h.analog);
        assert_eq!(&pitch[5..7], &[30, 5]);
        assert_eq!(
            i32::from_be_bytes([pitch[7], pitch[8], pitch[9], pitch[10]]),
            45_000
        );
        let roll = recv(&h.analog);
        assert_eq!(&roll[5..7], &[30, 6]);
        assert_eq!(
            i32::from_be_bytes([roll[7], roll[8], roll[9], roll[10]]),
            -22_500
        );

        h.dispatcher.flush_sensors();
        let frame = recv(&h.sensor);
        assert_eq!(frame.len(), 3 + 4 * 4);
        assert_eq!(&frame[..3], &[3, 1, 4]);
        assert_eq!(&frame[3..7], &50i32.to_be_bytes());

        // Nothing changed, nothing sent
        h.dispatcher.flush_sensors();
        assert_eq!(h.dispatcher.stats().sensor_frames, 1);
    }

    #[test]
    fn test_sensor_without_values_gets_id_only() {
        let mut h = harness();
        h.dispatcher.handle(Update::Sensor {
            name: "Light".to_string(),
            values: None,
        });
        h.dispatcher.flush_sensors();

        assert_eq!(h.dispatcher.sensors().get("Light").map(|r| r.sensor_id()), Some(4));
        assert_eq!(h.dispatcher.stats().sensor_frames, 0);
    }

    #[test]
    fn test_unknown_derived_signal_rejected() {
        let mut config = AppConfig::default();
        config.dispatch.derived = vec![DerivedSignal::new("Game Rotation Vector", 2, 1.0, "att_yaw")];
        let registry = SignalRegistry::parse(SCHEMA).unwrap();
        let result = Dispatcher::new(&config, &registry, Arc::new(SensorIdTable::new()));
        assert!(matches!(result, Err(Error::UnknownSignal(name)) if name == "att_yaw"));
    }
}
