//! gRPC server for the prn daemon.
//!
//! Serves `ProcessRunnerService` over mutual TLS; every request passes the
//! SPIFFE interceptor before reaching a handler.

mod auth;
mod runner_svc;
mod tls;

pub use auth::{peer_identity, spiffe_interceptor, PeerIdentity};
pub use runner_svc::ProcessRunnerServiceImpl;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::info;

use prn_core::config::TlsMaterial;
use prn_proto::v1::process_runner_service_server::ProcessRunnerServiceServer;

use crate::supervisor::Supervisor;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// gRPC server handle.
pub struct GrpcServer {
    tls: tonic::transport::ServerTlsConfig,
    service: ProcessRunnerServiceImpl,
}

impl GrpcServer {
    /// Creates the server with a fresh supervisor.
    pub fn new(tls_material: &TlsMaterial) -> std::io::Result<Self> {
        let supervisor = Arc::new(Supervisor::new()?);
        Ok(Self {
            tls: tls::server_tls_config(tls_material),
            service: ProcessRunnerServiceImpl::new(supervisor),
        })
    }

    /// Binds `addr` (hostnames are resolved) and serves until the process is
    /// stopped.
    pub async fn serve(self, addr: &str) -> Result<(), ServerError> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Starting gRPC server (mTLS)");

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        health_reporter
            .set_serving::<ProcessRunnerServiceServer<ProcessRunnerServiceImpl>>()
            .await;

        Server::builder()
            .tls_config(self.tls)?
            .http2_keepalive_interval(Some(Duration::from_secs(30)))
            .http2_keepalive_timeout(Some(Duration::from_secs(10)))
            .add_service(health_service)
            .add_service(ProcessRunnerServiceServer::with_interceptor(
                self.service,
                auth::spiffe_interceptor,
            ))
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await?;
        Ok(())
    }
}
