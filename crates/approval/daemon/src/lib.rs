//! Approval daemon library
//!
//! This module provides the pieces approvald is assembled from:
//! - Layered configuration (defaults, file, environment)
//! - Template file loading
//! - The daemon lifecycle around the SLA monitor

#![deny(unsafe_code)]

pub mod config;
pub mod daemon;
pub mod error;
pub mod templates;

pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
