//! TLS setup for broker connections.
//!
//! Trust comes from `ssl_ca_location` when set, otherwise from the public
//! webpki roots. A client certificate is presented only when both the
//! certificate and key locations are configured.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::debug;

use crate::config::SecurityConfig;
use crate::error::KafkaError;
use crate::Result;

/// Build the rustls client configuration for the given security settings.
pub fn build_tls_config(security: &SecurityConfig) -> Result<ClientConfig> {
    let roots = build_root_store(security.ssl_ca_location.as_deref())?;
    let builder = ClientConfig::builder().with_root_certificates(roots);

    match (
        &security.ssl_certificate_location,
        &security.ssl_key_location,
    ) {
        (Some(cert_path), Some(key_path)) => {
            debug!(
                "Presenting client certificate {} (key {})",
                cert_path.display(),
                key_path.display()
            );
            let certs = load_certificates(cert_path)?;
            let key = load_private_key(key_path)?;
            Ok(builder.with_client_auth_cert(certs, key).map_err(|e| {
                KafkaError::TlsConfig(format!("Invalid client certificate or key: {}", e))
            })?)
        }
        (None, None) => Ok(builder.with_no_client_auth()),
        (Some(_), None) => Err(KafkaError::TlsConfig(
            "ssl_certificate_location is set but ssl_key_location is missing".to_string(),
        )
        .into()),
        (None, Some(_)) => Err(KafkaError::TlsConfig(
            "ssl_key_location is set but ssl_certificate_location is missing".to_string(),
        )
        .into()),
    }
}

fn build_root_store(ca_path: Option<&Path>) -> Result<RootCertStore> {
    let Some(path) = ca_path else {
        debug!("No CA configured, trusting webpki roots");
        return Ok(RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        });
    };

    let mut store = RootCertStore::empty();
    for cert in load_certificates(path)? {
        store.add(cert).map_err(|e| cert_error(path, format!("Rejected CA certificate: {}", e)))?;
    }

    debug!("Trusting {} CA certificate(s) from {}", store.len(), path.display());
    Ok(store)
}

fn cert_error(path: &Path, message: String) -> KafkaError {
    KafkaError::CertificateLoad {
        path: path.display().to_string(),
        message,
    }
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| cert_error(path, format!("Failed to open file: {}", e)))?;

    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| cert_error(path, format!("Invalid PEM: {}", e)))?;

    if certs.is_empty() {
        return Err(cert_error(path, "No certificates found in file".to_string()).into());
    }
    Ok(certs)
}

/// Load the first PKCS#1, PKCS#8 or SEC1 key in a PEM file.
fn load_private_key(path: &PathBuf) -> Result<PrivateKeyDer<'static>> {
    let key_error = |message: String| KafkaError::PrivateKeyLoad {
        path: path.display().to_string(),
        message,
    };

    let file = File::open(path).map_err(|e| key_error(format!("Failed to open file: {}", e)))?;

    match rustls_pemfile::private_key(&mut BufReader::new(file)) {
        Ok(Some(key)) => Ok(key),
        Ok(None) => Err(key_error("No private key found in file".to_string()).into()),
        Err(e) => Err(key_error(format!("Invalid PEM: {}", e)).into()),
    }
}
