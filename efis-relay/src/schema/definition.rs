//! Signal definitions parsed from the signal list

use crate::error::SchemaError;

/// Resolution keyword for semicircle-to-degree conversion
pub const SEMI2DEG_KEYWORD: &str = "semi2deg";

/// Degrees per semicircle count (180 / 2^31)
pub const SEMI2DEG: f64 = 180.0 / 2_147_483_648.0;

/// Number of fields in a signal record
const RECORD_FIELDS: usize = 7;

/// How a signal is carried on the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalKind {
    /// Fixed-point: value / resolution, truncated to i32
    Fixed {
        /// Engineering units per network count
        resolution: f64,
    },
}

impl SignalKind {
    /// Schema literal for this kind
    pub fn literal(&self) -> &'static str {
        match self {
            SignalKind::Fixed { .. } => "fixed",
        }
    }
}

/// A named signal and its wire address
#[derive(Debug, Clone, PartialEq)]
pub struct SignalDefinition {
    pub category_id: u8,
    pub sub_id: u8,
    pub name: String,
    pub unit: String,
    pub kind: SignalKind,
    pub timeout_ms: u32,
}

impl SignalDefinition {
    /// Engineering units per network count
    pub fn resolution(&self) -> f64 {
        match self.kind {
            SignalKind::Fixed { resolution } => resolution,
        }
    }

    /// Parse one record line
    ///
    /// Format: `category_id, sub_id, name, unit, kind, timeout_ms, resolution`
    /// where `resolution` may be the `semi2deg` keyword. `line` is the 1-based
    /// line number used in errors.
    pub fn from_record(line: usize, text: &str) -> Result<Self, SchemaError> {
        let fields: Vec<&str> = text.split(',').map(str::trim).collect();
        if fields.len() != RECORD_FIELDS {
            return Err(SchemaError::MalformedLine {
                line,
                fields: fields.len(),
            });
        }

        let category_id = parse_field(line, "category id", fields[0])?;
        let sub_id = parse_field(line, "sub id", fields[1])?;
        let name = fields[2].to_string();
        let unit = fields[3].to_string();

        if fields[4] != "fixed" {
            return Err(SchemaError::UnsupportedType {
                line,
                kind: fields[4].to_string(),
            });
        }

        let timeout_ms = parse_field(line, "timeout", fields[5])?;
        let resolution = parse_resolution(line, fields[6])?;

        Ok(Self {
            category_id,
            sub_id,
            name,
            unit,
            kind: SignalKind::Fixed { resolution },
            timeout_ms,
        })
    }
}

fn parse_field<T: std::str::FromStr>(
    line: usize,
    field: &'static str,
    text: &str,
) -> Result<T, SchemaError> {
    text.parse().map_err(|_| SchemaError::InvalidField {
        line,
        field,
        text: text.to_string(),
    })
}

fn parse_resolution(line: usize, text: &str) -> Result<f64, SchemaError> {
    if text == SEMI2DEG_KEYWORD {
        return Ok(SEMI2DEG);
    }

    let resolution: f64 = parse_field(line, "resolution", text)?;
    if resolution == 0.0 || !resolution.is_finite() {
        return Err(SchemaError::InvalidResolution { line, resolution });
    }
    Ok(resolution)
}
