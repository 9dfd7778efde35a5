//! Server-side mTLS configuration.

use tonic::transport::{Certificate, Identity, ServerTlsConfig};

use prn_core::config::TlsMaterial;

/// Builds the daemon's TLS configuration: present our identity, require a
/// client certificate signed by the shared root CA.
pub fn server_tls_config(material: &TlsMaterial) -> ServerTlsConfig {
    let identity = Identity::from_pem(&material.cert_pem, &material.key_pem);
    let client_ca = Certificate::from_pem(&material.ca_cert_pem);
    ServerTlsConfig::new()
        .identity(identity)
        .client_ca_root(client_ca)
}
