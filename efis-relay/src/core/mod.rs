//! Core abstractions shared by sources and the dispatch loop.
//!
//! - [`source::TelemetrySource`]: Trait to implement for a new telemetry feed
//! - [`types`]: Updates, worker events and poll results

pub mod source;
pub mod types;
