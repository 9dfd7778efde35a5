//! `prn` Protocol Buffers
//!
//! Generated protobuf code for the `prn` gRPC API: the
//! `ProcessRunnerService` used by the daemon and the CLI.

/// prn v1 API definitions.
///
/// All generated types and services are included here.
#[allow(
    clippy::derive_partial_eq_without_eq,
    clippy::pedantic,
    clippy::nursery
)]
pub mod v1 {
    tonic::include_proto!("prn.v1");
}

// Re-export v1 as the default API version for convenience
pub use v1::*;

// Re-export prost_types for downstream crates that need Timestamp conversion
pub use prost_types;
