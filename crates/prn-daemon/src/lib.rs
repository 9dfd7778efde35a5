//! prn Daemon Library
//!
//! Core functionality for the prn daemon:
//! - Append-only output capture with replay-from-start subscriptions
//! - Process supervision under cgroup-v2 isolation
//! - gRPC server with mTLS and SPIFFE peer-identity authorization

pub mod output;
pub mod server;
pub mod supervisor;
