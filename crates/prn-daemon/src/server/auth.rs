//! SPIFFE peer-identity extraction.
//!
//! Every RPC arrives over mTLS, so the transport has already verified the
//! client certificate against the shared root CA. The interceptor lifts the
//! identity out of the certificate: the host component of the first
//! `spiffe://` URI SAN in the peer leaf (e.g. `spiffe://client1/task` yields
//! `client1`). Requests without one are rejected as unauthenticated before
//! any handler runs.

use tonic::{Request, Status};
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

/// Peer identity of the calling client, injected into request extensions by
/// [`spiffe_interceptor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity(pub String);

/// Interceptor extracting the SPIFFE identity from the peer certificate.
#[allow(clippy::result_large_err)]
pub fn spiffe_interceptor(mut req: Request<()>) -> Result<Request<()>, Status> {
    let identity = req
        .peer_certs()
        .and_then(|certs| {
            certs
                .first()
                .and_then(|leaf| spiffe_id_from_der(leaf.as_ref()))
        })
        .ok_or_else(|| Status::unauthenticated("client must have SPIFFE ID"))?;

    req.extensions_mut().insert(PeerIdentity(identity));
    Ok(req)
}

/// Reads the identity a request was stamped with by the interceptor.
#[allow(clippy::result_large_err)]
pub fn peer_identity<T>(req: &Request<T>) -> Result<&PeerIdentity, Status> {
    req.extensions()
        .get::<PeerIdentity>()
        .ok_or_else(|| Status::unauthenticated("client must have SPIFFE ID"))
}

/// Finds the first SPIFFE URI SAN in a DER-encoded certificate and returns
/// its host (trust domain) component.
fn spiffe_id_from_der(der: &[u8]) -> Option<String> {
    let (_, cert) = X509Certificate::from_der(der).ok()?;
    let san = cert.subject_alternative_name().ok().flatten()?;
    san.value.general_names.iter().find_map(|name| match name {
        GeneralName::URI(uri) => spiffe_host(uri).map(str::to_string),
        _ => None,
    })
}

/// `spiffe://client1/workload` -> `client1`.
fn spiffe_host(uri: &str) -> Option<&str> {
    let rest = uri.strip_prefix("spiffe://")?;
    match rest.split('/').next() {
        Some(host) if !host.is_empty() => Some(host),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams, Ia5String, KeyPair, SanType};

    fn cert_with_sans(sans: Vec<SanType>) -> Vec<u8> {
        let mut params = CertificateParams::new(Vec::new()).unwrap();
        params.subject_alt_names = sans;
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        cert.der().to_vec()
    }

    #[test]
    fn spiffe_host_takes_trust_domain() {
        assert_eq!(spiffe_host("spiffe://client1"), Some("client1"));
        assert_eq!(spiffe_host("spiffe://client1/workload/a"), Some("client1"));
        assert_eq!(spiffe_host("https://client1"), None);
        assert_eq!(spiffe_host("spiffe://"), None);
    }

    #[test]
    fn extracts_identity_from_certificate() {
        let der = cert_with_sans(vec![SanType::URI(
            Ia5String::try_from("spiffe://client1").unwrap(),
        )]);
        assert_eq!(spiffe_id_from_der(&der), Some("client1".to_string()));
    }

    #[test]
    fn skips_non_spiffe_uris() {
        let der = cert_with_sans(vec![
            SanType::URI(Ia5String::try_from("https://example.com").unwrap()),
            SanType::URI(Ia5String::try_from("spiffe://client2/task").unwrap()),
        ]);
        assert_eq!(spiffe_id_from_der(&der), Some("client2".to_string()));
    }

    #[test]
    fn certificate_without_uri_san_yields_none() {
        let der = cert_with_sans(vec![SanType::DnsName(
            Ia5String::try_from("localhost").unwrap(),
        )]);
        assert_eq!(spiffe_id_from_der(&der), None);
    }

    #[test]
    fn request_without_identity_is_unauthenticated() {
        let req = Request::new(());
        let err = peer_identity(&req).unwrap_err();
        assert_eq!(err.code(), tonic::Code::Unauthenticated);
    }

    #[test]
    fn stamped_request_yields_identity() {
        let mut req = Request::new(());
        req.extensions_mut().insert(PeerIdentity("client1".into()));
        assert_eq!(peer_identity(&req).unwrap().0, "client1");
    }
}
