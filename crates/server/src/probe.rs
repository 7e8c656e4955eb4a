//! TLS certificate probing.
//!
//! Fallback for PUT requests that need a certificate but supply none: open
//! a TLS connection to the node, capture whatever certificate chain it
//! presents, and store that. Trust-on-first-use at best; callers should
//! supply certificates themselves, and this fallback goes away once they
//! all do.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rustls::SignatureScheme;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts any certificate; the point is capturing it, not verifying it.
#[derive(Debug)]
struct CaptureVerifier;

impl ServerCertVerifier for CaptureVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Fetch the certificate chain served at `host:port`, PEM-encoded and then
/// base64-wrapped the way records store certificates. Returns an empty
/// string when the probe fails; the caller treats that as "no certificate".
pub async fn obtain_cert(hostport: &str) -> String {
    match tokio::time::timeout(PROBE_TIMEOUT, probe(hostport)).await {
        Ok(Ok(cert)) => cert,
        Ok(Err(err)) => {
            tracing::warn!(endpoint = hostport, error = %err, "certificate probe failed");
            String::new()
        }
        Err(_) => {
            tracing::warn!(endpoint = hostport, "certificate probe timed out");
            String::new()
        }
    }
}

async fn probe(hostport: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let host = hostport
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(hostport)
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();

    let config = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(CaptureVerifier))
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let stream = TcpStream::connect(hostport).await?;
    let server_name = ServerName::try_from(host)?;
    let tls = connector.connect(server_name, stream).await?;

    let (_, connection) = tls.get_ref();
    let certs = connection
        .peer_certificates()
        .ok_or("no peer certificates presented")?;

    let mut pem = String::new();
    for cert in certs {
        pem.push_str("-----BEGIN CERTIFICATE-----\n");
        let encoded = STANDARD.encode(cert.as_ref());
        for chunk in encoded.as_bytes().chunks(64) {
            pem.push_str(std::str::from_utf8(chunk).expect("base64 is ascii"));
            pem.push('\n');
        }
        pem.push_str("-----END CERTIFICATE-----\n");
    }

    Ok(STANDARD.encode(pem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unreachable_endpoint_yields_empty() {
        // nothing listens on this port
        assert_eq!(obtain_cert("127.0.0.1:1").await, "");
    }

    #[tokio::test]
    async fn garbage_endpoint_yields_empty() {
        assert_eq!(obtain_cert("not an endpoint").await, "");
    }
}
