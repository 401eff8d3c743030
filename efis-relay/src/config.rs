//! Configuration for the EFIS relay
//!
//! Loaded from a TOML file. Every section has defaults, so an empty file (or
//! no file at all) describes the stock setup: X-Plane on localhost relayed to
//! a display on localhost.

use crate::error::{Error, Result};
use crate::sources::synthetic::{self, SyntheticChannel};
use crate::sources::xplane::{self, XPlaneLink};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub schema: SchemaConfig,
    pub network: NetworkConfig,
    pub dispatch: DispatchConfig,
    pub source: SourceConfig,
    pub xplane: XPlaneConfig,
    pub sensor_process: SensorProcessConfig,
    pub synthetic: SyntheticConfig,
    pub logging: LoggingConfig,
}

/// Identity of this relay on the display network
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Sender device id written into every analog packet
    pub sender_id: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self { sender_id: 30 }
    }
}

/// Signal list location
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchemaConfig {
    pub path: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            path: crate::schema::DEFAULT_SIGNAL_LIST.to_string(),
        }
    }
}

/// Display destinations
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Hosts that receive every packet
    pub hosts: Vec<String>,
    /// UDP port for analog signal packets
    pub analog_port: u16,
    /// UDP port for sensor blocks
    pub sensor_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["127.0.0.1".to_string()],
            analog_port: 7777,
            sensor_port: 5860,
        }
    }
}

impl NetworkConfig {
    /// `host:port` for every host
    pub fn targets(&self, port: u16) -> Vec<String> {
        self.hosts.iter().map(|h| format!("{}:{}", h, port)).collect()
    }
}

/// Sensor value copied onto an analog signal
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DerivedSignal {
    /// Sensor name as reported by the source
    pub sensor: String,
    /// Index into the sensor's values
    pub element: usize,
    /// Multiplier applied before encoding
    pub scale: f64,
    /// Target schema signal
    pub signal: String,
}

impl DerivedSignal {
    pub fn new(sensor: &str, element: usize, scale: f64, signal: &str) -> Self {
        Self {
            sensor: sensor.to_string(),
            element,
            scale,
            signal: signal.to_string(),
        }
    }
}

/// Dispatch loop tuning
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Upstream records drained per tick
    pub max_batch: usize,
    /// Idle sleep between ticks
    pub tick_ms: u64,
    /// Statistics log period; 0 disables
    pub stats_interval_secs: u64,
    /// Signals folded into [-180, 180] before encoding
    pub heading_signals: Vec<String>,
    /// Sensor elements forwarded as analog signals
    pub derived: Vec<DerivedSignal>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_batch: 25,
            tick_ms: 10,
            stats_interval_secs: 1,
            heading_signals: vec!["heading_true".to_string(), "heading_mag".to_string()],
            derived: vec![
                DerivedSignal::new("Game Rotation Vector", 0, 90.0, "att_pitch"),
                DerivedSignal::new("Game Rotation Vector", 1, 90.0, "att_roll"),
            ],
        }
    }
}

impl DispatchConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

/// Which telemetry source feeds the relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// X-Plane UDP data output
    #[default]
    Xplane,
    /// Sensor subprocess printing JSON samples
    #[value(name = "sensor_process")]
    SensorProcess,
    /// Swept test values
    Synthetic,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SourceKind::Xplane => "xplane",
            SourceKind::SensorProcess => "sensor_process",
            SourceKind::Synthetic => "synthetic",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
}

/// X-Plane receiver
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct XPlaneConfig {
    /// Address X-Plane sends its data output to
    pub listen_address: String,
    /// Field byte order
    pub little_endian: bool,
    /// Seconds without a datagram before a read error is reported
    pub receive_timeout_secs: f64,
    /// Dataref to signal mapping
    pub links: Vec<XPlaneLink>,
}

impl Default for XPlaneConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:49009".to_string(),
            little_endian: true,
            receive_timeout_secs: 5.0,
            links: xplane::default_links(),
        }
    }
}

impl XPlaneConfig {
    /// Receive timeout as a `Duration`; must be positive and representable
    pub fn receive_timeout(&self) -> Result<Duration> {
        let secs = self.receive_timeout_secs;
        if secs.is_nan() || secs <= 0.0 {
            return Err(Error::Config(format!(
                "xplane.receive_timeout_secs must be positive, got {}",
                secs
            )));
        }
        Duration::try_from_secs_f64(secs).map_err(|e| {
            Error::Config(format!("xplane.receive_timeout_secs = {}: {}", secs, e))
        })
    }
}

/// Sensor subprocess
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SensorProcessConfig {
    /// Program followed by its arguments
    pub command: Vec<String>,
}

impl Default for SensorProcessConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "termux-sensor".to_string(),
                "-s".to_string(),
                "3-axis Accelerometer, 3-axis Gyroscope, Game Rotation Vector".to_string(),
                "-d".to_string(),
                "100".to_string(),
            ],
        }
    }
}

/// Synthetic source
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub period_ms: u64,
    pub channels: Vec<SyntheticChannel>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            period_ms: 10,
            channels: synthetic::default_channels(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `env_logger` filter, overridden by `RUST_LOG`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from TOML file
    ///
    /// # Example
    /// ```no_run
    /// use efis_relay::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("efis-relay.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the relay cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.network.hosts.is_empty() {
            return Err(Error::Config("network.hosts is empty".to_string()));
        }
        if self.dispatch.max_batch == 0 {
            return Err(Error::Config("dispatch.max_batch must be positive".to_string()));
        }
        self.xplane.receive_timeout()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_empty_file_is_default() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.device.sender_id, 30);
        assert_eq!(config.network.analog_port, 7777);
        assert_eq!(config.network.sensor_port, 5860);
        assert_eq!(config.dispatch.max_batch, 25);
        assert_eq!(config.source.kind, SourceKind::Xplane);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_sections() {
        let toml_str = r#"
            [network]
            hosts = ["192.168.1.20", "192.168.1.21"]

            [source]
            kind = "sensor_process"

            [logging]
            level = "efis_relay=debug"

            [[dispatch.derived]]
            sensor = "Game Rotation Vector"
            element = 2
            scale = 180.0
            signal = "heading_mag"
        "#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.network.analog_port, 7777);
        assert_eq!(
            config.network.targets(config.network.sensor_port),
            vec!["192.168.1.20:5860", "192.168.1.21:5860"]
        );
        assert_eq!(config.source.kind, SourceKind::SensorProcess);
        assert_eq!(config.logging.level, "efis_relay=debug");
        assert_eq!(config.dispatch.tick_ms, 10);
        assert_eq!(
            config.dispatch.derived,
            vec![DerivedSignal::new("Game Rotation Vector", 2, 180.0, "heading_mag")]
        );
    }

    #[test]
    fn test_file_roundtrip() {
        let mut config = AppConfig::default();
        config.source.kind = SourceKind::Synthetic;
        config.synthetic.period_ms = 50;

        let file = NamedTempFile::new().unwrap();
        config.to_file(file.path()).unwrap();
        let loaded = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_invalid_toml() {
        let file = NamedTempFile::new().unwrap();
        fs::write(file.path(), "[network\nhosts = 3").unwrap();
        assert!(matches!(AppConfig::from_file(file.path()), Err(Error::Config(_))));
    }

    #[test]
    fn test_validation() {
        let mut config = AppConfig::default();
        config.network.hosts.clear();
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.dispatch.max_batch = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.xplane.receive_timeout_secs = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_receive_timeout_out_of_range() {
        let config: AppConfig = toml::from_str("[xplane]\nreceive_timeout_secs = 1e30\n").unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(matches!(config.xplane.receive_timeout(), Err(Error::Config(_))));

        let mut config = AppConfig::default();
        config.xplane.receive_timeout_secs = f64::NAN;
        assert!(config.validate().is_err());
        config.xplane.receive_timeout_secs = f64::INFINITY;
        assert!(config.validate().is_err());

        config.xplane.receive_timeout_secs = 0.25;
        assert_eq!(
            config.xplane.receive_timeout().unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_stats_interval() {
        let mut dispatch = DispatchConfig::default();
        assert_eq!(dispatch.stats_interval(), Some(Duration::from_secs(1)));
        dispatch.stats_interval_secs = 0;
        assert_eq!(dispatch.stats_interval(), None);
    }
}
