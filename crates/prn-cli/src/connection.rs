//! Daemon connection dialing.
//!
//! The CLI presents its own certificate (mTLS) and verifies the daemon
//! against the shared root CA, all taken from the `PRN_*` environment.

use std::time::Duration;

use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint};

use prn_core::config::{self, TlsMaterial};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Opens an mTLS channel for unary calls, with a per-request deadline.
pub async fn dial() -> anyhow::Result<Channel> {
    connect(Some(REQUEST_TIMEOUT)).await
}

/// Opens an mTLS channel for `logs`: the output stream stays open for as
/// long as the process keeps producing, so no request deadline applies.
pub async fn dial_streaming() -> anyhow::Result<Channel> {
    connect(None).await
}

async fn connect(request_timeout: Option<Duration>) -> anyhow::Result<Channel> {
    let addr = config::address_from_env();
    let material = TlsMaterial::from_env()?;

    let tls = ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(&material.ca_cert_pem))
        .identity(tonic::transport::Identity::from_pem(
            &material.cert_pem,
            &material.key_pem,
        ));

    let mut endpoint = Endpoint::from_shared(format!("https://{addr}"))?
        .connect_timeout(CONNECT_TIMEOUT)
        .tls_config(tls)?;
    if let Some(timeout) = request_timeout {
        endpoint = endpoint.timeout(timeout);
    }

    Ok(endpoint.connect().await?)
}
