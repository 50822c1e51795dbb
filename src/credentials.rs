//! Loading of client certificate material from PEM files

use crate::transport::tls::{PeerVerification, SecurityContext};
use crate::transport::TransportError;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse PEM in {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No certificates found in {}", .0.display())]
    NoCertificates(PathBuf),
    #[error("No private key found in {}", .0.display())]
    NoPrivateKey(PathBuf),
    #[error("Certificate material rejected")]
    Invalid(#[source] TransportError),
}

/// Locations of the PEM files that make up the client identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialFiles {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    /// Extra trust anchors for the broker certificate
    pub ca_file: Option<PathBuf>,
}

fn open(path: &Path) -> Result<BufReader<File>, CredentialError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CredentialError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Read every certificate in a PEM file; at least one is required
pub fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, CredentialError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| CredentialError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    if certs.is_empty() {
        return Err(CredentialError::NoCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

/// Read the first private key (PKCS#8, PKCS#1 or SEC1) in a PEM file
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, CredentialError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| CredentialError::Parse {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| CredentialError::NoPrivateKey(path.to_path_buf()))
}

/// Build a security context and check that rustls accepts it
pub fn load_security_context(
    files: &CredentialFiles,
    verification: PeerVerification,
) -> Result<SecurityContext, CredentialError> {
    let chain = load_certificates(&files.cert_file)?;
    let key = load_private_key(&files.key_file)?;

    let mut context = SecurityContext::new(chain, key).with_verification(verification);
    if let Some(ca_file) = &files.ca_file {
        context = context.with_trust_anchors(load_certificates(ca_file)?);
    }

    // Unsupported key types surface here rather than at connect
    context.client_config().map_err(CredentialError::Invalid)?;

    debug!(
        cert_file = %files.cert_file.display(),
        certificates = context.certificate_count(),
        "Loaded client credentials"
    );
    Ok(context)
}
