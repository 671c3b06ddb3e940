//! TLS client configuration trusting a single relay certificate.

use crate::error::ClientError;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

/// Build a client config that trusts the certificates in the PEM file at `cert`.
pub fn client_config(cert: &Path) -> Result<Arc<rustls::ClientConfig>, ClientError> {
    let file = File::open(cert).map_err(|_| ClientError::CertificateNotFound(cert.to_path_buf()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ClientError::Tls(format!("Failed to parse {cert:?}: {e}")))?;
    if certs.is_empty() {
        return Err(ClientError::Tls(format!("No certificates found in {cert:?}")));
    }

    let mut roots = rustls::RootCertStore::empty();
    for der in certs {
        roots
            .add(der)
            .map_err(|e| ClientError::Tls(format!("Rejected certificate in {cert:?}: {e}")))?;
    }

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ClientError::Tls(format!("Unsupported protocol versions: {e}")))?
    .with_root_certificates(roots)
    .with_no_client_auth();

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_generated_cert() {
        let dir = tempfile::tempdir().unwrap();
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let path = dir.path().join("cert.pem");
        std::fs::write(&path, generated.cert.pem()).unwrap();

        assert!(client_config(&path).is_ok());
    }

    #[test]
    fn test_missing_certificate() {
        let err = client_config(Path::new("/nonexistent/cert.pem")).unwrap_err();
        assert!(matches!(err, ClientError::CertificateNotFound(_)));
    }

    #[test]
    fn test_empty_certificate_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cert.pem");
        std::fs::write(&path, "").unwrap();

        assert!(matches!(client_config(&path), Err(ClientError::Tls(_))));
    }
}
