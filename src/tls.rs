use std::fs::File;
use std::io::BufReader;
use std::sync::{Arc, Once};

use tokio_rustls::TlsAcceptor;
use tokio_rustls::rustls::ServerConfig as RustlsServerConfig;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::ChatError;

static INSTALL_CRYPTO_PROVIDER: Once = Once::new();

/// Loads a PEM certificate chain and private key and builds a `TlsAcceptor`.
///
/// Certificate *acquisition* (ACME/issuance) is explicitly out of scope (§1) — this only loads
/// whatever pair is configured, the same trust the teacher places in Rocket's TLS config.
pub fn load_acceptor(cert_path: &str, key_path: &str) -> Result<TlsAcceptor, ChatError> {
    // rustls 0.23 needs a process-level default `CryptoProvider` before `ServerConfig::builder()`
    // can be called; install the `ring` provider this crate depends on exactly once.
    INSTALL_CRYPTO_PROVIDER.call_once(|| {
        let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();
    });

    let cert_file = File::open(cert_path).map_err(ChatError::Io)?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<_, _>>()
        .map_err(|e| ChatError::Tls(format!("failed to parse certificate at {cert_path}: {e}")))?;
    if certs.is_empty() {
        return Err(ChatError::Tls(format!(
            "no certificates found in {cert_path}"
        )));
    }

    let key_file = File::open(key_path).map_err(ChatError::Io)?;
    let mut key_reader = BufReader::new(key_file);
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| ChatError::Tls(format!("failed to parse private key at {key_path}: {e}")))?
        .ok_or_else(|| ChatError::Tls(format!("no private key found in {key_path}")))?;

    let config = RustlsServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ChatError::Tls(format!("invalid certificate/key pair: {e}")))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
