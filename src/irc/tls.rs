/// TLS acceptor for the secure listener.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("no private key found in {0}")]
    NoPrivateKey(PathBuf),
    #[error("rustls error: {0}")]
    Tls(#[from] tokio_rustls::rustls::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> TlsError + '_ {
    move |source| TlsError::Io {
        path: path.to_owned(),
        source,
    }
}

/// Load the PEM certificate chain and private key and build an acceptor.
pub fn build_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, TlsError> {
    info!("loading TLS certificate from {}", cert_path.display());

    let cert_pem = std::fs::read(cert_path).map_err(io_err(cert_path))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<_, _>>()
        .map_err(io_err(cert_path))?;

    let key_pem = std::fs::read(key_path).map_err(io_err(key_path))?;
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(io_err(key_path))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_owned()))?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}
