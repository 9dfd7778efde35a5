//! Environment configuration.
//!
//! The daemon and the CLI share one configuration surface: the `PRN_*`
//! environment variables. TLS material is passed as inline PEM text, not as
//! file paths, so a deployment can inject certificates without touching disk.

use crate::error::{Error, Result};

/// Default listen/dial address when `PRN_ADDRESS` is not set.
pub const DEFAULT_ADDRESS: &str = "localhost:50051";

/// Variable holding the listen/dial address.
pub const ADDRESS_VAR: &str = "PRN_ADDRESS";
/// Variable holding the PEM-encoded private key.
pub const TLS_KEY_VAR: &str = "PRN_TLS_KEY";
/// Variable holding the PEM-encoded leaf certificate.
pub const TLS_CERT_VAR: &str = "PRN_TLS_CERT";
/// Variable holding the PEM-encoded root CA certificate.
pub const CA_CERT_VAR: &str = "PRN_CA_TLS_CERT";

/// The listen/dial address, falling back to [`DEFAULT_ADDRESS`].
pub fn address_from_env() -> String {
    match std::env::var(ADDRESS_VAR) {
        Ok(addr) if !addr.trim().is_empty() => addr,
        _ => DEFAULT_ADDRESS.to_string(),
    }
}

/// PEM-encoded TLS material for one side of the mTLS connection.
///
/// Both sides present a certificate signed by the shared root CA; the daemon
/// additionally uses the CA to verify client certificates.
#[derive(Clone)]
pub struct TlsMaterial {
    /// Private key PEM.
    pub key_pem: String,
    /// Leaf certificate PEM.
    pub cert_pem: String,
    /// Root CA certificate PEM.
    pub ca_cert_pem: String,
}

impl TlsMaterial {
    /// Load the TLS PEM trio from the environment.
    ///
    /// All three variables must be present and non-blank.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            key_pem: require_pem(TLS_KEY_VAR)?,
            cert_pem: require_pem(TLS_CERT_VAR)?,
            ca_cert_pem: require_pem(CA_CERT_VAR)?,
        })
    }
}

impl std::fmt::Debug for TlsMaterial {
    // Key material stays out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial").finish_non_exhaustive()
    }
}

fn require_pem(var: &str) -> Result<String> {
    match std::env::var(var) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(Error::Config(format!(
            "missing TLS environment variable {var}; require {TLS_KEY_VAR}, {TLS_CERT_VAR}, {CA_CERT_VAR}"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // Environment mutation is process-global, so every case lives in one test.
    #[test]
    fn env_roundtrip() {
        std::env::remove_var(ADDRESS_VAR);
        assert_eq!(address_from_env(), DEFAULT_ADDRESS);

        std::env::set_var(ADDRESS_VAR, "0.0.0.0:6000");
        assert_eq!(address_from_env(), "0.0.0.0:6000");
        std::env::set_var(ADDRESS_VAR, "   ");
        assert_eq!(address_from_env(), DEFAULT_ADDRESS);
        std::env::remove_var(ADDRESS_VAR);

        std::env::remove_var(TLS_KEY_VAR);
        std::env::remove_var(TLS_CERT_VAR);
        std::env::remove_var(CA_CERT_VAR);
        assert!(TlsMaterial::from_env().is_err());

        std::env::set_var(TLS_KEY_VAR, "key pem");
        std::env::set_var(TLS_CERT_VAR, "cert pem");
        assert!(TlsMaterial::from_env().is_err(), "CA still missing");

        std::env::set_var(CA_CERT_VAR, "ca pem");
        let material = TlsMaterial::from_env().unwrap();
        assert_eq!(material.key_pem, "key pem");
        assert_eq!(material.cert_pem, "cert pem");
        assert_eq!(material.ca_cert_pem, "ca pem");

        std::env::remove_var(TLS_KEY_VAR);
        std::env::remove_var(TLS_CERT_VAR);
        std::env::remove_var(CA_CERT_VAR);
    }

    #[test]
    fn debug_hides_key_material() {
        let material = TlsMaterial {
            key_pem: "secret".into(),
            cert_pem: "cert".into(),
            ca_cert_pem: "ca".into(),
        };
        let rendered = format!("{material:?}");
        assert!(!rendered.contains("secret"));
    }
}
