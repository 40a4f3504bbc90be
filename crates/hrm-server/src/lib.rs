//! # hrm-server
//!
//! HTTP server library for the HRM recorder.
//!
//! This library provides the API handlers, logging setup and state management
//! used by the `hrm-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
