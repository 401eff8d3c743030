//! Sensor telemetry packets
//!
//! One frame carries every reading that changed since the last frame,
//! concatenated in caller order. Each record is big-endian:
//!
//! ```text
//! ┌───────────┬───────┬─────────┬──────────────────────┐
//! │ sensor_id │ dirty │ count N │ N × i32 (value × 100) │
//! │ u8        │ u8(1) │ u8      │                      │
//! └───────────┴───────┴─────────┴──────────────────────┘
//! ```
//!
//! Sensor ids come from a shared [`SensorIdTable`]: names seen for the first
//! time get `max_id + 1`, ids are never reused or reassigned.

use crate::codec::analog::to_counts;
use crate::error::EncodeError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Engineering units per count for sensor values (0.01)
pub const SENSOR_RESOLUTION: f64 = 0.01;

/// Ids known before any sensor is observed
pub const SEED_SENSOR_IDS: [(&str, u8); 3] = [
    ("3-axis Gyroscope", 1),
    ("3-axis Accelerometer", 2),
    ("Game Rotation Vector", 3),
];

/// Record header: id, dirty flag, value count
const RECORD_HEADER_LEN: usize = 3;

/// Append-only sensor name → id table, shared by every reading
#[derive(Debug)]
pub struct SensorIdTable {
    ids: Mutex<HashMap<String, u8>>,
}

impl SensorIdTable {
    /// Table seeded with the well-known sensors
    pub fn new() -> Self {
        Self::with_seed(SEED_SENSOR_IDS)
    }

    pub fn with_seed<I, S>(seed: I) -> Self
    where
        I: IntoIterator<Item = (S, u8)>,
        S: Into<String>,
    {
        let ids = seed.into_iter().map(|(n, id)| (n.into(), id)).collect();
        Self {
            ids: Mutex::new(ids),
        }
    }

    /// Id for `name`, assigning `max + 1` on first sight
    pub fn assign(&self, name: &str) -> Result<u8, EncodeError> {
        let mut ids = self.ids.lock();
        if let Some(&id) = ids.get(name) {
            return Ok(id);
        }

        let max = ids.values().copied().max().unwrap_or(0);
        let id = max
            .checked_add(1)
            .ok_or_else(|| EncodeError::SensorIdsExhausted {
                name: name.to_string(),
            })?;
        ids.insert(name.to_string(), id);
        log::info!("Adding sensor {} = {}", name, id);
        Ok(id)
    }

    pub fn get(&self, name: &str) -> Option<u8> {
        self.ids.lock().get(name).copied()
    }

    /// All assignments ordered by id
    pub fn snapshot(&self) -> Vec<(String, u8)> {
        let mut entries: Vec<(String, u8)> = self
            .ids
            .lock()
            .iter()
            .map(|(n, &id)| (n.clone(), id))
            .collect();
        entries.sort_by_key(|&(_, id)| id);
        entries
    }
}

impl Default for SensorIdTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Latest values of one sensor and whether they are still unsent
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    sensor_id: u8,
    name: String,
    values: Vec<f64>,
    dirty: bool,
}

impl SensorReading {
    /// Create an empty, clean reading, assigning its id from `table`
    pub fn new(name: &str, table: &SensorIdTable) -> Result<Self, EncodeError> {
        Ok(Self {
            sensor_id: table.assign(name)?,
            name: name.to_string(),
            values: Vec::new(),
            dirty: false,
        })
    }

    pub fn sensor_id(&self) -> u8 {
        self.sensor_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Replace the values and mark the reading unsent
    pub fn set_values(&mut self, values: Vec<f64>) {
        self.values = values;
        self.dirty = true;
    }

    /// Append this reading's record to `out` and clear the dirty flag
    ///
    /// The flag is cleared even when encoding fails; `out` is untouched on error.
    pub fn encode_into(&mut self, out: &mut Vec<u8>) -> Result<(), EncodeError> {
        self.dirty = false;

        let count = u8::try_from(self.values.len()).map_err(|_| EncodeError::TooManyValues {
            sensor: self.name.clone(),
            count: self.values.len(),
        })?;
        let counts = self
            .values
            .iter()
            .map(|&v| scale_sensor_value(v))
            .collect::<Result<Vec<i32>, _>>()?;

        out.reserve(RECORD_HEADER_LEN + counts.len() * 4);
        out.push(self.sensor_id);
        out.push(1);
        out.push(count);
        for c in counts {
            out.extend_from_slice(&c.to_be_bytes());
        }
        Ok(())
    }
}

/// `trunc(value * 100)`
fn scale_sensor_value(value: f64) -> Result<i32, EncodeError> {
    to_counts(value * 100.0, 1.0).map_err(|_| EncodeError::ValueOutOfRange {
        value,
        resolution: SENSOR_RESOLUTION,
    })
}

/// Encode every dirty reading, in slice order, into one frame
///
/// Clean readings are skipped and left untouched. A reading that cannot be
/// encoded is logged, cleared and left out; the rest of the frame is kept.
pub fn encode_sensor_block(readings: &mut [SensorReading]) -> Vec<u8> {
    let mut out = Vec::new();
    for reading in readings.iter_mut().filter(|r| r.dirty) {
        if let Err(e) = reading.encode_into(&mut out) {
            log::warn!("Skipping sensor {}: {}", reading.name, e);
        }
    }
    out
}

/// Readings keyed by sensor name, kept in first-seen order
#[derive(Debug)]
pub struct SensorSet {
    table: Arc<SensorIdTable>,
    readings: Vec<SensorReading>,
    index: HashMap<String, usize>,
}

impl SensorSet {
    pub fn new(table: Arc<SensorIdTable>) -> Self {
        Self {
            table,
            readings: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Reading for `name`, creating it (and its id) on first sight
    pub fn observe(&mut self, name: &str) -> Result<&mut SensorReading, EncodeError> {
        let existing = self.index.get(name).copied();
        let i = match existing {
            Some(i) => i,
            None => {
                let reading = SensorReading::new(name, &self.table)?;
                self.readings.push(reading);
                self.index.insert(name.to_string(), self.readings.len() - 1);
                self.readings.len() - 1
            }
        };
        Ok(&mut self.readings[i])
    }

    /// Observe `name` and replace its values
    pub fn update(&mut self, name: &str, values: Vec<f64>) -> Result<(), EncodeError> {
        self.observe(name)?.set_values(values);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&SensorReading> {
        self.index.get(name).map(|&i| &self.readings[i])
    }

    pub fn readings(&self) -> &[SensorReading] {
        &self.readings
    }

    pub fn has_dirty(&self) -> bool {
        self.readings.iter().any(|r| r.dirty)
    }

    /// Frame of all readings changed since the previous frame
    pub fn encode_dirty(&mut self) -> Vec<u8> {
        encode_sensor_block(&mut self.readings)
    }

    pub fn id_table(&self) -> &Arc<SensorIdTable> {
        &self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_seeded_ids() {
        let table = SensorIdTable::new();
        assert_eq!(table.get("3-axis Gyroscope"), Some(1));
        assert_eq!(table.get("3-axis Accelerometer"), Some(2));
        assert_eq!(table.get("Game Rotation Vector"), Some(3));
        assert_eq!(table.assign("Game Rotation Vector").unwrap(), 3);
    }

    #[test]
    fn test_new_name_gets_next_id() {
        let table = SensorIdTable::new();
        assert_eq!(table.assign("Light").unwrap(), 4);
        assert_eq!(table.assign("Proximity").unwrap(), 5);
        assert_eq!(table.assign("Light").unwrap(), 4);
        assert_eq!(
            table.snapshot().last(),
            Some(&("Proximity".to_string(), 5))
        );
    }

    #[test]
    fn test_next_id_follows_max_not_count() {
        let table = SensorIdTable::with_seed([("a", 10), ("b", 2)]);
        assert_eq!(table.assign("c").unwrap(), 11);
    }

    #[test]
    fn test_ids_exhausted() {
        let table = SensorIdTable::with_seed([("last", 255)]);
        assert!(matches!(
            table.assign("overflow"),
            Err(EncodeError::SensorIdsExhausted { .. })
        ));
        assert_eq!(table.get("overflow"), None);
    }

    #[test]
    fn test_concurrent_assignment_is_distinct() {
        let table = Arc::new(SensorIdTable::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let table = Arc::clone(&table);
                thread::spawn(move || table.assign(&format!("sensor-{i}")).unwrap())
            })
            .collect();
        let mut ids: Vec<u8> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        ids.sort_unstable();
        assert_eq!(ids, (4..12).collect::<Vec<u8>>());
    }

    #[test]
    fn test_record_layout() {
        let table = SensorIdTable::new();
        let mut reading = SensorReading::new("3-axis Accelerometer", &table).unwrap();
        reading.set_values(vec![1.5, -2.25, 0.0]);

        let mut out = Vec::new();
        reading.encode_into(&mut out).unwrap();
        assert_eq!(out.len(), 3 + 3 * 4);
        assert_eq!(&out[..3], &[2, 1, 3]);
        assert_eq!(i32::from_be_bytes(out[3..7].try_into().unwrap()), 150);
        assert_eq!(i32::from_be_bytes(out[7..11].try_into().unwrap()), -225);
        assert_eq!(i32::from_be_bytes(out[11..15].try_into().unwrap()), 0);
        assert!(!reading.is_dirty());
    }

    #[test]
    fn test_block_only_dirty_in_order() {
        let table = SensorIdTable::new();
        let mut readings = vec![
            SensorReading::new("3-axis Gyroscope", &table).unwrap(),
            SensorReading::new("3-axis Accelerometer", &table).unwrap(),
            SensorReading::new("Game Rotation Vector", &table).unwrap(),
        ];
        readings[2].set_values(vec![0.5]);
        readings[0].set_values(vec![-1.0]);

        let block = encode_sensor_block(&mut readings);
        assert_eq!(block.len(), 2 * (3 + 4));
        assert_eq!(block[0], 1);
        assert_eq!(block[7], 3);
        assert!(readings.iter().all(|r| !r.is_dirty()));
        assert!(readings[1].values().is_empty());

        assert!(encode_sensor_block(&mut readings).is_empty());
    }

    #[test]
    fn test_bad_reading_does_not_drop_others() {
        let table = SensorIdTable::new();
        let mut readings = vec![
            SensorReading::new("3-axis Gyroscope", &table).unwrap(),
            SensorReading::new("3-axis Accelerometer", &table).unwrap(),
        ];
        readings[0].set_values(vec![f64::INFINITY]);
        readings[1].set_values(vec![2.0]);

        let block = encode_sensor_block(&mut readings);
        assert_eq!(block, vec![2, 1, 1, 0, 0, 0, 200]);
        assert!(!readings[0].is_dirty());
    }

    #[test]
    fn test_too_many_values() {
        let table = SensorIdTable::new();
        let mut reading = SensorReading::new("3-axis Gyroscope", &table).unwrap();
        reading.set_values(vec![0.0; 256]);
        let mut out = Vec::new();
        assert!(matches!(
            reading.encode_into(&mut out),
            Err(EncodeError::TooManyValues { count: 256, .. })
        ));
        assert!(out.is_empty());
    }

    #[test]
    fn test_sensor_set_keeps_first_seen_order() {
        let mut set = SensorSet::new(Arc::new(SensorIdTable::new()));
        set.update("Light", vec![12.0]).unwrap();
        set.update("3-axis Gyroscope", vec![0.1, 0.2, 0.3]).unwrap();
        set.update("Light", vec![13.0]).unwrap();

        let names: Vec<&str> = set.readings().iter().map(|r| r.name()).collect();
        assert_eq!(names, ["Light", "3-axis Gyroscope"]);
        assert_eq!(set.get("Light").unwrap().sensor_id(), 4);
        assert_eq!(set.get("Light").unwrap().values(), &[13.0]);
        assert!(set.has_dirty());

        let frame = set.encode_dirty();
        assert_eq!(frame[0], 4);
        assert!(!set.has_dirty());
    }

    #[test]
    fn test_observe_without_values_stays_clean() {
        let mut set = SensorSet::new(Arc::new(SensorIdTable::new()));
        let reading = set.observe("Step Counter").unwrap();
        assert_eq!(reading.sensor_id(), 4);
        assert!(!reading.is_dirty());
        assert!(set.encode_dirty().is_empty());
    }
}
