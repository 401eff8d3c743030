//! Error types for EFIS relay

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Relay error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be read or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Signal schema failed to load
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Packet could not be built
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// A configured signal name is not present in the schema
    #[error("Unknown signal: {0}")]
    UnknownSignal(String),

    /// A configured X-Plane dataref name is not in the catalog
    #[error("Unknown X-Plane dataref: {0}")]
    UnknownDataref(String),

    /// Receive-side failure of a telemetry source; the caller may retry next cycle
    #[error("Source read error: {0}")]
    SourceRead(String),

    /// Subprocess or worker thread could not be started
    #[error("Spawn failed: {0}")]
    Spawn(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Signal list parse failures. Fatal at load time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// No non-comment line was found to carry the version
    #[error("signal list has no version line")]
    MissingVersion,

    /// Version line is not an integer once commas are removed
    #[error("invalid version line: {text:?}")]
    InvalidVersion { text: String },

    /// Record does not have exactly 7 comma-separated fields
    #[error("line {line}: expected 7 fields, found {fields}")]
    MalformedLine { line: usize, fields: usize },

    /// Signal kind other than `fixed`
    #[error("line {line}: unsupported signal type {kind:?}")]
    UnsupportedType { line: usize, kind: String },

    /// Numeric field could not be parsed
    #[error("line {line}: invalid {field} {text:?}")]
    InvalidField {
        line: usize,
        field: &'static str,
        text: String,
    },

    /// Resolution of zero or a non-finite value
    #[error("line {line}: resolution {resolution} cannot scale values")]
    InvalidResolution { line: usize, resolution: f64 },

    /// Signal name appears twice
    #[error("line {line}: duplicate signal name {name:?}")]
    DuplicateName { line: usize, name: String },

    /// Two signals share a category/sub id pair
    #[error("signals {first:?} and {second:?} share id {category_id}/{sub_id}")]
    DuplicateId {
        category_id: u8,
        sub_id: u8,
        first: String,
        second: String,
    },
}

/// Packet encode failures. Fatal only to the packet being built.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EncodeError {
    /// Signal kind cannot be carried by the requested packet type
    #[error("signal {name:?} has a kind the analog packet cannot carry")]
    SignalKindMismatch { name: String },

    /// Scaled value does not fit in a signed 32-bit count
    #[error("value {value} at resolution {resolution} does not fit in i32")]
    ValueOutOfRange { value: f64, resolution: f64 },

    /// Sensor record holds more values than the u8 count field allows
    #[error("sensor {sensor:?} has {count} values (max 255)")]
    TooManyValues { sensor: String, count: usize },

    /// No sensor ids left to assign
    #[error("no sensor id left for {name:?}")]
    SensorIdsExhausted { name: String },
}
