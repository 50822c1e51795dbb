//! Security context for the mutually-authenticated TLS transport
//!
//! The client proves its identity with a certificate, never with a password.
//! Two peer-verification policies are supported:
//!
//! - [`PeerVerification::Mutual`] verifies the broker chain and hostname.
//! - [`PeerVerification::SkipHostname`] still verifies the broker chain but
//!   accepts a certificate that is not valid for the dialled hostname.

use super::TransportError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::{
    CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use std::fmt;
use std::sync::Arc;

/// Broker certificate verification policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PeerVerification {
    /// Verify chain and hostname
    #[default]
    Mutual,
    /// Verify chain only; hostname mismatches are accepted
    SkipHostname,
}

/// Client certificate material plus the broker verification policy
pub struct SecurityContext {
    cert_chain: Vec<CertificateDer<'static>>,
    private_key: PrivateKeyDer<'static>,
    trust_anchors: Vec<CertificateDer<'static>>,
    verification: PeerVerification,
}

impl SecurityContext {
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, private_key: PrivateKeyDer<'static>) -> Self {
        Self {
            cert_chain,
            private_key,
            trust_anchors: Vec::new(),
            verification: PeerVerification::default(),
        }
    }

    /// Trust these CA certificates in addition to the webpki root set
    pub fn with_trust_anchors(mut self, anchors: Vec<CertificateDer<'static>>) -> Self {
        self.trust_anchors = anchors;
        self
    }

    pub fn with_verification(mut self, verification: PeerVerification) -> Self {
        self.verification = verification;
        self
    }

    /// Number of certificates in the client chain
    pub fn certificate_count(&self) -> usize {
        self.cert_chain.len()
    }

    pub fn verification(&self) -> PeerVerification {
        self.verification
    }

    /// Build the rustls client configuration for this context
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, TransportError> {
        let roots = Arc::new(build_root_store(&self.trust_anchors)?);

        let builder = ClientConfig::builder();
        let builder = match self.verification {
            PeerVerification::Mutual => builder.with_root_certificates(roots),
            PeerVerification::SkipHostname => {
                let inner = WebPkiServerVerifier::builder(roots)
                    .build()
                    .map_err(|e| TransportError::Tls(format!("verifier setup: {e}")))?;
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(HostnameAgnosticVerifier { inner }))
            }
        };

        let config = builder
            .with_client_auth_cert(self.cert_chain.clone(), self.private_key.clone_key())
            .map_err(|e| TransportError::Tls(format!("client certificate: {e}")))?;

        Ok(Arc::new(config))
    }
}

impl Clone for SecurityContext {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            private_key: self.private_key.clone_key(),
            trust_anchors: self.trust_anchors.clone(),
            verification: self.verification,
        }
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("certificates", &self.cert_chain.len())
            .field("trust_anchors", &self.trust_anchors.len())
            .field("verification", &self.verification)
            .finish_non_exhaustive()
    }
}

fn build_root_store(extra: &[CertificateDer<'static>]) -> Result<RootCertStore, TransportError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if !extra.is_empty() {
        let (added, _ignored) = roots.add_parsable_certificates(extra.iter().cloned());
        if added == 0 {
            return Err(TransportError::Tls(
                "none of the configured CA certificates could be parsed".to_string(),
            ));
        }
    }

    Ok(roots)
}

/// Chain verification that tolerates a hostname mismatch
#[derive(Debug)]
struct HostnameAgnosticVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for HostnameAgnosticVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        match self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        ) {
            Err(rustls::Error::InvalidCertificate(CertificateError::NotValidForName)) => {
                Ok(ServerCertVerified::assertion())
            }
            other => other,
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::BufReader;

    const FIXTURE_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures");

    pub(crate) fn fixture_key() -> PrivateKeyDer<'static> {
        let key_pem = std::fs::read(format!("{FIXTURE_DIR}/client.key")).unwrap();
        rustls_pemfile::private_key(&mut BufReader::new(key_pem.as_slice()))
            .unwrap()
            .unwrap()
    }

    pub(crate) fn fixture_context() -> SecurityContext {
        let cert_pem = std::fs::read(format!("{FIXTURE_DIR}/client.crt")).unwrap();
        let chain = rustls_pemfile::certs(&mut BufReader::new(cert_pem.as_slice()))
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        SecurityContext::new(chain, fixture_key())
    }

    fn fixture_cert(name: &str) -> CertificateDer<'static> {
        let pem = std::fs::read(format!("{FIXTURE_DIR}/{name}")).unwrap();
        let cert = rustls_pemfile::certs(&mut BufReader::new(pem.as_slice()))
            .next()
            .unwrap()
            .unwrap();
        cert
    }

    /// Chain verifier trusting only the test CA
    fn test_ca_verifier() -> Arc<WebPkiServerVerifier> {
        let mut roots = RootCertStore::empty();
        roots.add(fixture_cert("ca.crt")).unwrap();
        WebPkiServerVerifier::builder(Arc::new(roots)).build().unwrap()
    }

    fn verify(
        verifier: &dyn ServerCertVerifier,
        cert: &str,
        host: &'static str,
    ) -> Result<ServerCertVerified, rustls::Error> {
        verifier.verify_server_cert(
            &fixture_cert(cert),
            &[],
            &ServerName::try_from(host).unwrap(),
            &[],
            UnixTime::now(),
        )
    }

    #[test]
    fn test_hostname_agnostic_accepts_name_mismatch() {
        let strict = test_ca_verifier();
        let agnostic = HostnameAgnosticVerifier {
            inner: strict.clone(),
        };

        assert!(verify(strict.as_ref(), "broker.crt", "broker.example.net").is_ok());
        assert!(matches!(
            verify(strict.as_ref(), "broker.crt", "other.example.org"),
            Err(rustls::Error::InvalidCertificate(
                CertificateError::NotValidForName
            ))
        ));
        assert!(verify(&agnostic, "broker.crt", "other.example.org").is_ok());
    }

    #[test]
    fn test_hostname_agnostic_rejects_foreign_chain() {
        let agnostic = HostnameAgnosticVerifier {
            inner: test_ca_verifier(),
        };

        // Right name, untrusted issuer
        assert!(matches!(
            verify(&agnostic, "foreign-broker.crt", "broker.example.net"),
            Err(rustls::Error::InvalidCertificate(
                CertificateError::UnknownIssuer
            ))
        ));
        // Wrong name and untrusted issuer: the chain failure wins
        assert!(verify(&agnostic, "foreign-broker.crt", "other.example.org").is_err());
    }

    #[test]
    fn test_default_verification_is_mutual() {
        let context = fixture_context();
        assert_eq!(context.verification(), PeerVerification::Mutual);
        assert_eq!(context.certificate_count(), 1);
    }

    #[test]
    fn test_client_config_mutual() {
        let context = fixture_context();
        assert!(context.client_config().is_ok());
    }

    #[test]
    fn test_client_config_skip_hostname() {
        let context = fixture_context().with_verification(PeerVerification::SkipHostname);
        assert!(context.client_config().is_ok());
    }

    #[test]
    fn test_client_config_with_extra_trust_anchor() {
        let base = fixture_context();
        let anchor = base.cert_chain[0].clone();
        let context = base.with_trust_anchors(vec![anchor]);
        assert!(context.client_config().is_ok());
    }

    #[test]
    fn test_unparsable_trust_anchor_rejected() {
        let context = fixture_context()
            .with_trust_anchors(vec![CertificateDer::from(vec![0x01, 0x02, 0x03])]);

        let result = context.client_config();
        assert!(matches!(result, Err(TransportError::Tls(_))));
    }

    #[test]
    fn test_debug_redacts_key_material() {
        let context = fixture_context();
        let debug = format!("{context:?}");
        assert!(debug.contains("certificates: 1"));
        assert!(!debug.contains("PRIVATE"));
    }

    #[test]
    fn test_clone_preserves_policy() {
        let context = fixture_context().with_verification(PeerVerification::SkipHostname);
        let cloned = context.clone();
        assert_eq!(cloned.verification(), PeerVerification::SkipHostname);
        assert_eq!(cloned.certificate_count(), context.certificate_count());
    }
}
