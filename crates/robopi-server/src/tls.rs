//! [`TlsChannelAcceptor`] – TLS for both channels.
//!
//! Loads a PEM certificate chain and private key once at startup and runs
//! the server side of the handshake on every accepted TCP stream.  Client
//! certificates are not requested.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use robopi_protocol::ChannelAcceptor;
use robopi_types::RobotError;
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio::net::TcpStream;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tracing::{debug, info};

/// Server-side TLS acceptor shared by the control and image listeners.
#[derive(Clone)]
pub struct TlsChannelAcceptor {
    inner: TlsAcceptor,
}

impl TlsChannelAcceptor {
    /// Load the certificate chain and key from PEM files.
    ///
    /// # Errors
    ///
    /// Returns [`RobotError::Tls`] if either file cannot be read or does not
    /// hold usable PEM material.
    pub fn from_pem_files(cert: &Path, key: &Path) -> Result<Self, RobotError> {
        let cert_pem = fs::read(cert)
            .map_err(|e| RobotError::Tls(format!("cannot read {}: {e}", cert.display())))?;
        let key_pem = fs::read(key)
            .map_err(|e| RobotError::Tls(format!("cannot read {}: {e}", key.display())))?;
        let acceptor = Self::from_pem(&cert_pem, &key_pem)?;
        info!(cert = %cert.display(), "TLS identity loaded");
        Ok(acceptor)
    }

    /// Build an acceptor from in-memory PEM data.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, RobotError> {
        let certs = parse_certs(cert_pem)?;
        let key = parse_key(key_pem)?;

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| RobotError::Tls(e.to_string()))?
            .with_no_client_auth()
            .with_single_cert(certs, key)
            .map_err(|e| RobotError::Tls(format!("certificate rejected: {e}")))?;

        Ok(Self {
            inner: TlsAcceptor::from(Arc::new(config)),
        })
    }
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, RobotError> {
    let mut reader = pem;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| RobotError::Tls(format!("invalid certificate PEM: {e}")))?;
    if certs.is_empty() {
        return Err(RobotError::Tls("no certificate found in PEM".to_string()));
    }
    Ok(certs)
}

fn parse_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, RobotError> {
    let mut reader = pem;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| RobotError::Tls(format!("invalid key PEM: {e}")))?
        .ok_or_else(|| RobotError::Tls("no private key found in PEM".to_string()))
}

#[async_trait]
impl ChannelAcceptor for TlsChannelAcceptor {
    type Stream = TlsStream<TcpStream>;

    async fn accept(&self, stream: TcpStream) -> io::Result<Self::Stream> {
        let stream = self.inner.accept(stream).await?;
        debug!("TLS handshake complete");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::{ClientConfig, RootCertStore};
    use rustls::pki_types::ServerName;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsConnector;

    const CA_PEM: &[u8] = include_bytes!("../testdata/ca.pem");
    const CERT_PEM: &[u8] = include_bytes!("../testdata/cert.pem");
    const KEY_PEM: &[u8] = include_bytes!("../testdata/key.pem");

    fn connector() -> TlsConnector {
        let mut roots = RootCertStore::empty();
        for cert in parse_certs(CA_PEM).unwrap() {
            roots.add(cert).unwrap();
        }
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        TlsConnector::from(Arc::new(config))
    }

    #[test]
    fn empty_pem_is_rejected() {
        let err = TlsChannelAcceptor::from_pem(b"", KEY_PEM).err().unwrap();
        assert!(matches!(err, RobotError::Tls(_)));
        let err = TlsChannelAcceptor::from_pem(CERT_PEM, b"").err().unwrap();
        assert!(matches!(err, RobotError::Tls(_)));
    }

    #[test]
    fn mismatched_material_is_rejected() {
        // A certificate is not a key.
        let err = TlsChannelAcceptor::from_pem(CERT_PEM, CERT_PEM).err().unwrap();
        assert!(matches!(err, RobotError::Tls(_)));
    }

    #[test]
    fn missing_files_are_reported() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let err = TlsChannelAcceptor::from_pem_files(
            &dir.path().join("cert.pem"),
            &dir.path().join("key.pem"),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("cert.pem"));
    }

    #[test]
    fn loads_from_files() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let cert = dir.path().join("cert.pem");
        let key = dir.path().join("key.pem");
        std::fs::write(&cert, CERT_PEM).unwrap();
        std::fs::write(&key, KEY_PEM).unwrap();
        assert!(TlsChannelAcceptor::from_pem_files(&cert, &key).is_ok());
    }

    #[tokio::test]
    async fn handshake_carries_plain_bytes_both_ways() {
        let acceptor = TlsChannelAcceptor::from_pem(CERT_PEM, KEY_PEM).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut tls = acceptor.accept(tcp).await.unwrap();
            let mut buf = [0u8; 5];
            tls.read_exact(&mut buf).await.unwrap();
            tls.write_all(b"CONN_OK\n").await.unwrap();
            tls.shutdown().await.unwrap();
            buf
        });

        let tcp = TcpStream::connect(addr).await.unwrap();
        let name = ServerName::try_from("localhost").unwrap();
        let mut tls = connector().connect(name, tcp).await.unwrap();
        tls.write_all(b"CONN\n").await.unwrap();
        let mut reply = Vec::new();
        tls.read_to_end(&mut reply).await.unwrap();

        assert_eq!(reply, b"CONN_OK\n");
        assert_eq!(&server.await.unwrap(), b"CONN\n");
    }

    #[tokio::test]
    async fn plaintext_client_fails_the_handshake() {
        let acceptor = TlsChannelAcceptor::from_pem(CERT_PEM, KEY_PEM).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            acceptor.accept(tcp).await.is_err()
        });

        let mut tcp = TcpStream::connect(addr).await.unwrap();
        tcp.write_all(b"CONN\n").await.unwrap();
        tcp.shutdown().await.unwrap();
        assert!(server.await.unwrap());
    }
}
