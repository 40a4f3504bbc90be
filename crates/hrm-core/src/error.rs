//! Unified error types for the recorder core library.
//!
//! [`HrmError`] covers every failure mode of a recorder session: device
//! selection, link establishment, frame decoding and configuration. The
//! configuration module keeps its own [`ConfigError`](crate::config::ConfigError)
//! for internal use and converts into this type at the crate boundary.
//!
//! # Propagation
//!
//! - **Selection / connect failures** are returned to the caller and are the
//!   only errors meant to be acted upon by calling code.
//! - **Malformed frames** are logged and dropped by the notification pump; they
//!   never end a session.
//! - **Optional metadata** (firmware revision) failures are swallowed at the
//!   call site.
//!
//! # Example
//!
//! ```rust
//! use hrm_core::error::{HrmError, Result};
//!
//! fn require_bound(device: Option<&str>) -> Result<&str> {
//!     device.ok_or(HrmError::NoDeviceBound)
//! }
//!
//! assert!(require_bound(None).is_err());
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all recorder operations.
#[derive(Debug, Error)]
pub enum HrmError {
    // =========================================================================
    // DEVICE / SESSION ERRORS
    // =========================================================================
    /// Discovery was aborted or timed out before a recorder was chosen.
    #[error("No recorder selected. Ensure the device is powered on and advertising.")]
    NoDeviceSelected,

    /// `connect` was called without a device and none is bound from before.
    #[error("No recorder bound to this session. Request a device first.")]
    NoDeviceBound,

    /// An operation that needs a live link was issued while disconnected.
    #[error("Recorder is not connected")]
    NotConnected,

    /// The link could not be established, or a mandatory service or
    /// characteristic was missing. Fatal to the connect attempt only.
    #[error("Link establishment failed: {0}")]
    LinkEstablishmentFailed(String),

    /// An optional read (e.g. firmware revision) failed.
    #[error("Optional metadata unavailable: {0}")]
    OptionalMetadataUnavailable(String),

    /// A transport primitive (read, write, subscribe) failed on a live link.
    #[error("Transport error: {0}")]
    Transport(String),

    // =========================================================================
    // WIRE PROTOCOL ERRORS
    // =========================================================================
    /// A frame was shorter than the minimum length for its declared kind.
    #[error("Malformed {kind} frame: expected at least {expected} bytes, got {actual}")]
    MalformedRecord {
        /// Frame kind as understood from the header (or "header").
        kind: String,
        /// Minimum number of bytes required.
        expected: usize,
        /// Number of bytes actually received.
        actual: usize,
    },

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("Configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // I/O ERRORS
    // =========================================================================
    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A specialized [`Result`] type for recorder operations.
pub type Result<T> = std::result::Result<T, HrmError>;

impl HrmError {
    /// Returns `true` if this error relates to selecting or connecting a device.
    #[inline]
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::NoDeviceSelected
                | Self::NoDeviceBound
                | Self::NotConnected
                | Self::LinkEstablishmentFailed(_)
                | Self::Transport(_)
        )
    }

    /// Returns `true` for per-frame or best-effort failures that must never
    /// interrupt a running session.
    #[inline]
    #[must_use]
    pub const fn is_non_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedRecord { .. } | Self::OptionalMetadataUnavailable(_)
        )
    }

    /// Returns `true` if retrying the same operation later may succeed.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NoDeviceSelected
                | Self::NotConnected
                | Self::LinkEstablishmentFailed(_)
                | Self::Transport(_)
        )
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 404 Not Found
            Self::NoDeviceSelected | Self::ConfigNotFound(_) => 404,

            // 409 Conflict - session is not in a state that allows the request
            Self::NoDeviceBound | Self::NotConnected => 409,

            // 422 Unprocessable Entity
            Self::MalformedRecord { .. }
            | Self::ConfigParseError(_)
            | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error
            Self::IoError(_) => 500,

            // 502 Bad Gateway - the recorder misbehaved
            Self::OptionalMetadataUnavailable(_) | Self::Transport(_) => 502,

            // 503 Service Unavailable
            Self::LinkEstablishmentFailed(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NoDeviceSelected => "NO_DEVICE_SELECTED",
            Self::NoDeviceBound => "NO_DEVICE_BOUND",
            Self::NotConnected => "NOT_CONNECTED",
            Self::LinkEstablishmentFailed(_) => "LINK_ESTABLISHMENT_FAILED",
            Self::OptionalMetadataUnavailable(_) => "OPTIONAL_METADATA_UNAVAILABLE",
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::MalformedRecord { .. } => "MALFORMED_RECORD",
            Self::ConfigNotFound(_) => "CONFIG_NOT_FOUND",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::IoError(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for HrmError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::NotFound(path) => Self::ConfigNotFound(path),
            ConfigError::Load(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::WriteError { path, source } => Self::IoError(std::io::Error::new(
                source.kind(),
                format!("Failed to write {}: {source}", path.display()),
            )),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
        }
    }
}

#[cfg(feature = "bluetooth")]
impl From<bluer::Error> for HrmError {
    fn from(err: bluer::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================
