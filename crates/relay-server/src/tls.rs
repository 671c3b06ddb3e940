//! TLS acceptor construction from PEM files.

use crate::config::{ConfigError, TlsFiles};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use tokio_rustls::TlsAcceptor;

/// Load the certificate chain from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let file = File::open(path).map_err(|_| ConfigError::MissingCertificate(path.to_path_buf()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Tls(format!("Failed to parse certificates in {path:?}: {e}")))?;

    if certs.is_empty() {
        return Err(ConfigError::Tls(format!("No certificates found in {path:?}")));
    }
    Ok(certs)
}

/// Load the first private key (PKCS#8, PKCS#1 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let file = File::open(path).map_err(|_| ConfigError::MissingPrivateKey(path.to_path_buf()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| ConfigError::Tls(format!("Failed to parse private key in {path:?}: {e}")))?
        .ok_or_else(|| ConfigError::Tls(format!("No private key found in {path:?}")))
}

/// Build an acceptor serving `files`, without client authentication.
pub fn acceptor(files: &TlsFiles) -> Result<TlsAcceptor, ConfigError> {
    let certs = load_certs(&files.cert)?;
    let key = load_private_key(&files.key)?;

    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ConfigError::Tls(format!("Unsupported protocol versions: {e}")))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| ConfigError::Tls(format!("Failed to build TLS config: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_pair(dir: &Path) -> TlsFiles {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let files = TlsFiles {
            cert: dir.join("cert.pem"),
            key: dir.join("key.pem"),
        };
        std::fs::write(&files.cert, cert.cert.pem()).unwrap();
        std::fs::write(&files.key, cert.key_pair.serialize_pem()).unwrap();
        files
    }

    #[test]
    fn test_acceptor_from_generated_pair() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_pair(dir.path());
        assert!(acceptor(&files).is_ok());
    }

    #[test]
    fn test_missing_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let files = TlsFiles {
            cert: dir.path().join("absent.pem"),
            key: dir.path().join("absent.key"),
        };
        assert!(matches!(
            acceptor(&files),
            Err(ConfigError::MissingCertificate(_))
        ));
    }

    #[test]
    fn test_certificate_without_pem_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = write_pair(dir.path());
        files.cert = dir.path().join("empty.pem");
        std::fs::write(&files.cert, "not a certificate").unwrap();

        assert!(matches!(acceptor(&files), Err(ConfigError::Tls(_))));
    }

    #[test]
    fn test_key_file_without_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = write_pair(dir.path());
        files.key = files.cert.clone();

        let err = acceptor(&files).err().expect("expected an error");
        assert!(err.to_string().contains("No private key"));
    }
}
