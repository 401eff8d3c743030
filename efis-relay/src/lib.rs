//! EFIS relay - telemetry bridge for electronic flight instrument displays
//!
//! Reads flight data from a simulator or a phone's sensors and re-emits it as
//! the display network's binary UDP packets.
//!
//! ## Modules
//!
//! - [`schema`]: signal list loading and lookup
//! - [`codec`]: analog packet and sensor frame encoding
//! - [`sources`]: X-Plane, sensor subprocess and synthetic adapters
//! - [`dispatch`]: the loop tying a source to the UDP outputs

pub mod codec;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod schema;
pub mod sources;
pub mod streaming;

// Re-export commonly used types
pub use config::AppConfig;
pub use dispatch::Dispatcher;
pub use error::{Error, Result};
pub use schema::SignalRegistry;
