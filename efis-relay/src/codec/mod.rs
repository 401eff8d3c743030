//! EFIS packet codec
//!
//! - [`analog`]: fixed 12-byte packets for schema signals
//! - [`sensor`]: variable-length frames of raw sensor readings

pub mod analog;
pub mod sensor;

pub use analog::{
    encode_analog, AnalogPacketDefinition, Clock, FixedClock, SubsecondClock, ANALOG_PACKET_LEN,
};
pub use sensor::{encode_sensor_block, SensorIdTable, SensorReading, SensorSet};
