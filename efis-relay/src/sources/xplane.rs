//! X-Plane UDP data output source
//!
//! X-Plane's "Data Output" screen broadcasts `DATA` datagrams:
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────┬─────┐
//! │ "DATA" + 1 B │ index u32 │ 8 × f32                      │ ... │
//! │ header (5)   │ one 36-byte record per selected data set │     │
//! └──────────────┴──────────────────────────────────────────┴─────┘
//! ```
//!
//! Fields are little-endian unless configured otherwise. The worker keeps the
//! latest record per index and, after every valid datagram, emits one
//! `Update::Signal` per configured link whose record has been seen.
//! Datagrams with a bad header or length are ignored. Socket errors and
//! receive timeouts are reported as read errors.

use crate::core::source::TelemetrySource;
use crate::core::types::{SourcePoll, Update};
use crate::error::{Error, Result};
use crate::schema::SignalRegistry;
use crate::sources::worker::{SourceWorker, WorkerContext, DEFAULT_CHANNEL_CAPACITY};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

/// Header length: "DATA" plus one internal-use byte
pub const HEADER_LEN: usize = 5;

/// Header magic
pub const HEADER_MAGIC: &[u8; 4] = b"DATA";

/// One data set: u32 index + 8 × f32
pub const RECORD_LEN: usize = 36;

/// Values per record
pub const RECORD_VALUES: usize = 8;

/// Maximum datagram accepted
const MAX_DATAGRAM_SIZE: usize = 4096;

/// Socket timeout so the worker can notice shutdown
const SOCKET_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Where a named quantity lives in X-Plane's data output
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DatarefSpec {
    pub name: &'static str,
    /// Data set index (row number in X-Plane's Data Output screen)
    pub index: u32,
    /// Position within the record's 8 values
    pub element: usize,
    pub units: &'static str,
}

/// Known data output quantities
#[rustfmt::skip]
pub const DATAREF_CATALOG: &[DatarefSpec] = &[
    DatarefSpec { name: "AirspeedIndicated", index: 3, element: 0, units: "kts" },
    DatarefSpec { name: "Groundspeed", index: 3, element: 2, units: "kts" },
    DatarefSpec { name: "Pitch", index: 17, element: 0, units: "deg" },
    DatarefSpec { name: "Roll", index: 17, element: 1, units: "deg" },
    DatarefSpec { name: "HeadingTrue", index: 17, element: 2, units: "deg" },
    DatarefSpec { name: "HeadingMag", index: 17, element: 3, units: "deg" },
    DatarefSpec { name: "Latitude", index: 20, element: 0, units: "deg" },
    DatarefSpec { name: "Longitude", index: 20, element: 1, units: "deg" },
    DatarefSpec { name: "AltitudeMSL", index: 20, element: 2, units: "ft" },
    DatarefSpec { name: "AltitudeAGL", index: 20, element: 3, units: "ft" },
    DatarefSpec { name: "RPM", index: 37, element: 0, units: "rpm" },
    DatarefSpec { name: "EGT", index: 47, element: 0, units: "degC" },
    DatarefSpec { name: "OilPressure", index: 49, element: 0, units: "psi" },
    DatarefSpec { name: "OilTemperature", index: 50, element: 0, units: "degC" },
];

/// Catalog lookup by name
pub fn dataref(name: &str) -> Option<&'static DatarefSpec> {
    DATAREF_CATALOG.iter().find(|d| d.name == name)
}

/// Forward one X-Plane quantity as a schema signal
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct XPlaneLink {
    /// Catalog name, e.g. `Pitch`
    pub dataref: String,
    /// Schema signal name, e.g. `att_pitch`
    pub signal: String,
}

impl XPlaneLink {
    pub fn new(dataref: &str, signal: &str) -> Self {
        Self {
            dataref: dataref.to_string(),
            signal: signal.to_string(),
        }
    }
}

/// Stock forwarding table for the EFIS attitude, engine and air data pages
pub fn default_links() -> Vec<XPlaneLink> {
    [
        ("RPM", "engine_rpm"),
        ("OilPressure", "oil_pressure"),
        ("OilTemperature", "oil_temperature"),
        ("Latitude", "gps_latitude"),
        ("Longitude", "gps_longitude"),
        ("AltitudeMSL", "altitude_msl"),
        ("AirspeedIndicated", "speed_ias"),
        ("Groundspeed", "speed_gs"),
        ("Pitch", "att_pitch"),
        ("Roll", "att_roll"),
        ("HeadingTrue", "heading_true"),
        ("HeadingMag", "heading_mag"),
    ]
    .into_iter()
    .map(|(d, s)| XPlaneLink::new(d, s))
    .collect()
}

/// Byte order of incoming fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    fn u32(self, b: [u8; 4]) -> u32 {
        match self {
            Endian::Little => u32::from_le_bytes(b),
            Endian::Big => u32::from_be_bytes(b),
        }
    }

    fn f32(self, b: [u8; 4]) -> f32 {
        match self {
            Endian::Little => f32::from_le_bytes(b),
            Endian::Big => f32::from_be_bytes(b),
        }
    }
}

/// Parse a `DATA` datagram into `(index, values)` records
///
/// Returns `None` when the datagram is not a well-formed data packet.
pub fn parse_datagram(data: &[u8], endian: Endian) -> Option<Vec<(u32, [f32; RECORD_VALUES])>> {
    if data.len() <= HEADER_LEN
        || (data.len() - HEADER_LEN) % RECORD_LEN != 0
        || &data[..HEADER_MAGIC.len()] != HEADER_MAGIC
    {
        return None;
    }

    let records = data[HEADER_LEN..]
        .chunks_exact(RECORD_LEN)
        .map(|rec| {
            let index = endian.u32(word(rec, 0));
            let mut values = [0f32; RECORD_VALUES];
            for (i, v) in values.iter_mut().enumerate() {
                *v = endian.f32(word(rec, 4 + i * 4));
            }
            (index, values)
        })
        .collect();
    Some(records)
}

fn word(data: &[u8], offset: usize) -> [u8; 4] {
    [
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ]
}

/// A link resolved against the catalog
#[derive(Debug, Clone)]
struct ResolvedLink {
    spec: &'static DatarefSpec,
    signal: String,
}

/// Latest data sets and the links to forward from them
pub struct DatarefTable {
    links: Vec<ResolvedLink>,
    latest: HashMap<u32, [f32; RECORD_VALUES]>,
}

impl DatarefTable {
    /// Resolve links against the catalog and the schema
    pub fn new(links: &[XPlaneLink], registry: &SignalRegistry) -> Result<Self> {
        let links = links
            .iter()
            .map(|link| -> Result<ResolvedLink> {
                let spec = dataref(&link.dataref)
                    .ok_or_else(|| Error::UnknownDataref(link.dataref.clone()))?;
                registry.require(&link.signal)?;
                Ok(ResolvedLink {
                    spec,
                    signal: link.signal.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            links,
            latest: HashMap::new(),
        })
    }

    /// Store records from one datagram
    pub fn ingest(&mut self, records: Vec<(u32, [f32; RECORD_VALUES])>) {
        self.latest.extend(records);
    }

    /// Current value of every link whose data set has been received
    pub fn updates(&self) -> Vec<Update> {
        self.links
            .iter()
            .filter_map(|link| {
                let values = self.latest.get(&link.spec.index)?;
                Some(Update::signal(&link.signal, values[link.spec.element] as f64))
            })
            .collect()
    }
}

/// X-Plane receiver settings
#[derive(Debug, Clone)]
pub struct XPlaneSettings {
    pub listen_address: String,
    pub endian: Endian,
    /// Report a read error after this long without a datagram
    pub receive_timeout: Duration,
}

/// Telemetry source fed by X-Plane's UDP data output
pub struct XPlaneSource {
    worker: SourceWorker,
    local_addr: SocketAddr,
}

impl XPlaneSource {
    /// Bind the socket and start receiving
    pub fn start(settings: XPlaneSettings, table: DatarefTable) -> Result<Self> {
        let socket = UdpSocket::bind(&settings.listen_address)?;
        socket.set_read_timeout(Some(SOCKET_POLL_TIMEOUT))?;
        let local_addr = socket.local_addr()?;
        log::info!("X-Plane receiver bound to {}", local_addr);

        let worker = SourceWorker::spawn("xplane-receiver", DEFAULT_CHANNEL_CAPACITY, move |ctx| {
            receive_loop(&socket, &settings, table, &ctx);
            0
        })?;

        Ok(Self { worker, local_addr })
    }

    /// Address the receiver is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl TelemetrySource for XPlaneSource {
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

/// Datagram input of the receive loop
trait DatagramSource: Send {
    fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;
}

impl DatagramSource for UdpSocket {
    fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.recv_from(buf).map(|(len, _src)| len)
    }
}

fn receive_loop(
    socket: &dyn DatagramSource,
    settings: &XPlaneSettings,
    mut table: DatarefTable,
    ctx: &WorkerContext,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
    let mut last_datagram = Instant::now();

    while ctx.is_running() {
        let len = match socket.recv(&mut buffer) {
            Ok(len) => len,
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                if last_datagram.elapsed() >= settings.receive_timeout {
                    last_datagram = Instant::now();
                    if !ctx.send_read_error(format!(
                        "no X-Plane data for {:?}",
                        settings.receive_timeout
                    )) {
                        break;
                    }
                }
                continue;
            }
            Err(e) => {
                if !ctx.send_read_error(format!("socket error - {}", e)) {
                    break;
                }
                // Back off so a persistent error cannot spin the worker
                thread::sleep(SOCKET_POLL_TIMEOUT);
                continue;
            }
        };
        last_datagram = Instant::now();

        let Some(records) = parse_datagram(&buffer[..len], settings.endian) else {
            log::trace!("Ignoring {} byte datagram", len);
            continue;
        };
        table.ingest(records);

        let updates = table.updates();
        if !updates.is_empty() && !ctx.send_record(updates) {
            break;
        }
    }

    log::info!("X-Plane receiver exiting");
}
