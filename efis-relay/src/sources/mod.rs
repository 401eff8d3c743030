//! Telemetry source adapters
//!
//! | Source | Upstream | Emits |
//! |--------|----------|-------|
//! | [`xplane`] | X-Plane UDP data output | `Update::Signal` |
//! | [`process`] | sensor subprocess printing JSON | `Update::Sensor` |
//! | [`synthetic`] | swept test values | `Update::Signal` |
//!
//! All of them run on a [`worker::SourceWorker`] thread.

pub mod process;
pub mod synthetic;
pub mod worker;
pub mod xplane;

pub use process::ProcessSource;
pub use synthetic::{SyntheticChannel, SyntheticSource};
pub use xplane::{XPlaneLink, XPlaneSource};

use crate::config::{AppConfig, SourceKind};
use crate::core::source::TelemetrySource;
use crate::error::Result;
use crate::schema::SignalRegistry;
use std::time::Duration;
use xplane::{DatarefTable, Endian, XPlaneSettings};

/// Start the source selected by `config`
///
/// Every signal and dataref name the source will emit is checked against the
/// registry and catalog before anything is started.
pub fn create_source(
    config: &AppConfig,
    registry: &SignalRegistry,
) -> Result<Box<dyn TelemetrySource>> {
    log::info!("Starting {} source", config.source.kind);

    match config.source.kind {
        SourceKind::Xplane => {
            let xp = &config.xplane;
            let table = DatarefTable::new(&xp.links, registry)?;
            let settings = XPlaneSettings {
                listen_address: xp.listen_address.clone(),
                endian: if xp.little_endian {
                    Endian::Little
                } else {
                    Endian::Big
                },
                receive_timeout: xp.receive_timeout()?,
            };
            Ok(Box::new(XPlaneSource::start(settings, table)?))
        }
        SourceKind::SensorProcess => Ok(Box::new(ProcessSource::spawn(
            &config.sensor_process.command,
        )?)),
        SourceKind::Synthetic => {
            let synth = &config.synthetic;
            for channel in &synth.channels {
                registry.require(&channel.signal)?;
            }
            Ok(Box::new(SyntheticSource::start(
                synth.channels.clone(),
                Duration::from_millis(synth.period_ms),
            )?))
        }
    }
}
