//! # hrm-core
//!
//! Client-side core for the HRM heart-rate / RRI recorder.
//!
//! This crate provides:
//! - The binary wire codec for commands, status reads and record notifications
//! - A session manager that owns the connection lifecycle, including bounded
//!   automatic reconnection with linear backoff
//! - Record sinks that receive every decoded record
//! - Configuration loading, saving and validation
//!
//! ## Architecture
//!
//! - [`protocol`] - Wire codec (pure, no I/O)
//! - [`session`] - Connection state machine and notification pump
//! - [`transport`] - Traits the session drives; one implementation per backend
//! - [`bluetooth`] - BlueZ transport (feature `bluetooth`)
//! - [`mock`] - Scripted in-memory recorder (feature `mock-bluetooth`)
//! - [`sink`] - Where decoded records go
//! - [`config`] - Application configuration
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod transport;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluetooth")]
pub use bluetooth::BluerTransport;
pub use config::{
    is_valid_mac_address, Config, ConfigError, ConfigResult, DeviceConfig, ServerConfig,
    SessionConfig,
};
pub use error::{HrmError, Result};
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use mock::MockTransport;
pub use session::SessionManager;
pub use sink::{BroadcastSink, RecordSink, SinkEvent, TracingSink};
pub use transport::{Characteristic, Link, LinkEvent, Transport};
pub use types::{
    ConnectionState, DeviceDescriptor, EnvironmentalPayload, RecordEnvelope, RecordKind,
    RecordPayload, RecordRange, RriPayload, SessionStatus,
};
