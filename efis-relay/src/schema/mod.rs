//! Signal schema registry
//!
//! Loads the signal list: a CSV-like text file that names every signal a
//! display understands and how it is addressed and scaled on the wire.
//!
//! ```text
//! # comments start with '#', anywhere in the file
//! 1,0,0                                           <- version (commas removed: 100)
//! 30,5,att_pitch,deg,fixed,1000,0.001             <- cat, sub, name, unit, kind, timeout, resolution
//! 40,1,gps_latitude,deg,fixed,2000,semi2deg       <- resolution keyword = 180 / 2^31
//! ```
//!
//! Loading is strict: any malformed line, unsupported kind, repeated name or
//! repeated `(category_id, sub_id)` pair fails the whole load. Lookups never fail.

pub mod definition;

pub use definition::{SignalDefinition, SignalKind, SEMI2DEG, SEMI2DEG_KEYWORD};

use crate::error::{Error, Result, SchemaError};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Default signal list location, relative to the working directory
pub const DEFAULT_SIGNAL_LIST: &str = "signals/signal_list.csv";

/// Immutable name → definition registry
#[derive(Debug, Clone)]
pub struct SignalRegistry {
    version: i64,
    signals: Vec<SignalDefinition>,
    by_name: HashMap<String, usize>,
}

impl SignalRegistry {
    /// Load a signal list from disk
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let registry = Self::parse(&text)?;
        log::info!(
            "Loaded signal list {} (version {}, {} signals)",
            path.as_ref().display(),
            registry.version,
            registry.len()
        );
        Ok(registry)
    }

    /// Parse a signal list from text
    pub fn parse(text: &str) -> std::result::Result<Self, SchemaError> {
        let mut version = None;
        let mut signals: Vec<SignalDefinition> = Vec::new();
        let mut by_name = HashMap::new();

        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }

            if version.is_none() {
                version = Some(parse_version(line)?);
                continue;
            }

            let def = SignalDefinition::from_record(line_no, line)?;
            if by_name.contains_key(&def.name) {
                return Err(SchemaError::DuplicateName {
                    line: line_no,
                    name: def.name,
                });
            }
            by_name.insert(def.name.clone(), signals.len());
            signals.push(def);
        }

        let version = version.ok_or(SchemaError::MissingVersion)?;
        check_unique_ids(&signals)?;

        Ok(Self {
            version,
            signals,
            by_name,
        })
    }

    /// Schema version (the first non-comment line with commas removed)
    pub fn version(&self) -> i64 {
        self.version
    }

    /// Look up a signal by name
    pub fn get(&self, name: &str) -> Option<&SignalDefinition> {
        self.by_name.get(name).map(|&i| &self.signals[i])
    }

    /// Look up a signal that configuration says must exist
    pub fn require(&self, name: &str) -> Result<&SignalDefinition> {
        self.get(name)
            .ok_or_else(|| Error::UnknownSignal(name.to_string()))
    }

    /// Definitions in file order
    pub fn iter(&self) -> impl Iterator<Item = &SignalDefinition> {
        self.signals.iter()
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

impl std::str::FromStr for SignalRegistry {
    type Err = SchemaError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// `"1,0,0"` is read as 100; the version is never treated as dotted.
fn parse_version(line: &str) -> std::result::Result<i64, SchemaError> {
    let digits = line.replace(',', "");
    digits
        .trim()
        .parse()
        .map_err(|_| SchemaError::InvalidVersion {
            text: line.to_string(),
        })
}

fn check_unique_ids(signals: &[SignalDefinition]) -> std::result::Result<(), SchemaError> {
    let mut seen: HashMap<(u8, u8), &str> = HashMap::new();
    for def in signals {
        if let Some(first) = seen.insert((def.category_id, def.sub_id), &def.name) {
            return Err(SchemaError::DuplicateId {
                category_id: def.category_id,
                sub_id: def.sub_id,
                first: first.to_string(),
                second: def.name.clone(),
            });
        }
    }
    Ok(())
}
