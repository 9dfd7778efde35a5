//! prn core library
//!
//! Shared pieces used by both the daemon and the CLI:
//! - Environment configuration (`PRN_*` variables, inline TLS PEM material)
//! - Error types
//! - Tracing/logging initialization

pub mod config;
pub mod error;
pub mod tracing_init;

pub use error::{Error, Result};
