//! Analog signal packets
//!
//! Fixed 12-byte datagram, all integers big-endian:
//!
//! ```text
//! ┌────────┬───────────┬─────┬─────┬──────────────┬──────────┐
//! │ sender │ timestamp │ cat │ sub │ value        │ checksum │
//! │ u8     │ u32       │ u8  │ u8  │ i32          │ u8 (0)   │
//! └────────┴───────────┴─────┴─────┴──────────────┴──────────┘
//!   0        1           5     6     7              11
//! ```
//!
//! `value = trunc(engineering_value / resolution)`. The timestamp is the
//! microsecond within the current second and wraps every second; receivers
//! cannot use it to order packets. The checksum byte is reserved and always 0.

use crate::error::EncodeError;
use crate::schema::{SignalDefinition, SignalKind};
use std::time::{SystemTime, UNIX_EPOCH};

/// Total analog packet length
pub const ANALOG_PACKET_LEN: usize = 12;

pub const OFFSET_SENDER: usize = 0;
pub const OFFSET_TIMESTAMP: usize = 1;
pub const OFFSET_CATEGORY: usize = 5;
pub const OFFSET_SUB_ID: usize = 6;
pub const OFFSET_VALUE: usize = 7;
pub const OFFSET_CHECKSUM: usize = 11;

/// Reserved checksum value
pub const CHECKSUM_PLACEHOLDER: u8 = 0;

/// Source of the header timestamp field
pub trait Clock: Send + Sync {
    fn timestamp(&self) -> u32;
}

/// Microseconds within the current UTC second (0..=999_999)
#[derive(Debug, Clone, Copy, Default)]
pub struct SubsecondClock;

impl Clock for SubsecondClock {
    fn timestamp(&self) -> u32 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_micros())
            .unwrap_or(0)
    }
}

/// Constant timestamp
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub u32);

impl Clock for FixedClock {
    fn timestamp(&self) -> u32 {
        self.0
    }
}

/// A signal this device is allowed to emit
#[derive(Debug, Clone, PartialEq)]
pub struct AnalogPacketDefinition {
    sender_device_id: u8,
    signal: SignalDefinition,
}

impl AnalogPacketDefinition {
    /// Bind a signal to a sender device
    pub fn from_signal(
        sender_device_id: u8,
        signal: &SignalDefinition,
    ) -> Result<Self, EncodeError> {
        match signal.kind {
            SignalKind::Fixed { .. } => Ok(Self {
                sender_device_id,
                signal: signal.clone(),
            }),
        }
    }

    pub fn sender_device_id(&self) -> u8 {
        self.sender_device_id
    }

    pub fn signal(&self) -> &SignalDefinition {
        &self.signal
    }

    /// Build the packet for `value`
    pub fn encode(
        &self,
        value: f64,
        clock: &dyn Clock,
    ) -> Result<[u8; ANALOG_PACKET_LEN], EncodeError> {
        let counts = match self.signal.kind {
            SignalKind::Fixed { resolution } => to_counts(value, resolution)?,
        };

        let mut data = [0u8; ANALOG_PACKET_LEN];
        data[OFFSET_SENDER] = self.sender_device_id;
        data[OFFSET_TIMESTAMP..OFFSET_CATEGORY].copy_from_slice(&clock.timestamp().to_be_bytes());
        data[OFFSET_CATEGORY] = self.signal.category_id;
        data[OFFSET_SUB_ID] = self.signal.sub_id;
        data[OFFSET_VALUE..OFFSET_CHECKSUM].copy_from_slice(&counts.to_be_bytes());
        data[OFFSET_CHECKSUM] = CHECKSUM_PLACEHOLDER;
        Ok(data)
    }
}

/// One-shot analog encode without keeping a binding
pub fn encode_analog(
    device_id: u8,
    signal: &SignalDefinition,
    value: f64,
    clock: &dyn Clock,
) -> Result<[u8; ANALOG_PACKET_LEN], EncodeError> {
    AnalogPacketDefinition::from_signal(device_id, signal)?.encode(value, clock)
}

/// Scale to network counts, truncating toward zero
///
/// NaN, infinities and anything outside the i32 range are rejected instead of
/// being saturated by the cast.
pub fn to_counts(value: f64, resolution: f64) -> Result<i32, EncodeError> {
    let scaled = (value / resolution).trunc();
    if !scaled.is_finite() || scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
        return Err(EncodeError::ValueOutOfRange { value, resolution });
    }
    Ok(scaled as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pitch() -> SignalDefinition {
        SignalDefinition {
            category_id: 30,
            sub_id: 5,
            name: "att_pitch".to_string(),
            unit: "deg".to_string(),
            kind: SignalKind::Fixed { resolution: 0.001 },
            timeout_ms: 1000,
        }
    }

    fn value_field(pkt: &[u8]) -> i32 {
        i32::from_be_bytes(pkt[OFFSET_VALUE..OFFSET_CHECKSUM].try_into().unwrap())
    }

    #[test]
    fn test_layout() {
        let pkt = encode_analog(30, &pitch(), -12.345, &FixedClock(0x0001_E240)).unwrap();
        assert_eq!(pkt.len(), 12);
        assert_eq!(pkt[OFFSET_SENDER], 30);
        assert_eq!(&pkt[OFFSET_TIMESTAMP..OFFSET_CATEGORY], &[0x00, 0x01, 0xE2, 0x40]);
        assert_eq!(pkt[OFFSET_CATEGORY], 30);
        assert_eq!(pkt[OFFSET_SUB_ID], 5);
        assert_eq!(value_field(&pkt), -12345);
        assert_eq!(pkt[OFFSET_CHECKSUM], 0);
    }

    #[test]
    fn test_truncates_toward_zero() {
        assert_eq!(to_counts(1.9, 1.0).unwrap(), 1);
        assert_eq!(to_counts(-1.9, 1.0).unwrap(), -1);
        assert_eq!(to_counts(0.5, 0.25).unwrap(), 2);
    }

    #[test]
    fn test_out_of_range() {
        assert!(matches!(
            to_counts(3.0e9, 1.0),
            Err(EncodeError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            to_counts(-3.0e9, 1.0),
            Err(EncodeError::ValueOutOfRange { .. })
        ));
        assert!(matches!(
            to_counts(f64::NAN, 1.0),
            Err(EncodeError::ValueOutOfRange { .. })
        ));
        assert_eq!(to_counts(i32::MAX as f64, 1.0).unwrap(), i32::MAX);
        assert_eq!(to_counts(i32::MIN as f64, 1.0).unwrap(), i32::MIN);
    }

    #[test]
    fn test_deterministic_with_fixed_clock() {
        let binding = AnalogPacketDefinition::from_signal(5, &pitch()).unwrap();
        let clock = FixedClock(123_456);
        assert_eq!(
            binding.encode(12.34, &clock).unwrap(),
            binding.encode(12.34, &clock).unwrap()
        );
    }

    #[test]
    fn test_value_change_only_touches_value_field() {
        let binding = AnalogPacketDefinition::from_signal(5, &pitch()).unwrap();
        let clock = FixedClock(42);
        let a = binding.encode(12.34, &clock).unwrap();
        let b = binding.encode(-3.5, &clock).unwrap();
        assert_eq!(a[..OFFSET_VALUE], b[..OFFSET_VALUE]);
        assert_eq!(a[OFFSET_CHECKSUM], b[OFFSET_CHECKSUM]);
        assert_ne!(a[OFFSET_VALUE..OFFSET_CHECKSUM], b[OFFSET_VALUE..OFFSET_CHECKSUM]);
    }

    #[test]
    fn test_subsecond_clock_range() {
        for _ in 0..100 {
            assert!(SubsecondClock.timestamp() < 1_000_000);
        }
    }
}
