use super::{read_with_length_prefix, send_with_length_prefix, Dialer, Exchange};
use async_trait::async_trait;
use rustls::pki_types::ServerName;
use std::net::SocketAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tracing::debug;
use veil_dns_domain::{DomainError, UpstreamSpec};

// rustls' default protocol set is TLS 1.3 with a TLS 1.2 floor, which is
// exactly the requirement for DoT upstreams.
static SHARED_TLS_CONFIG: LazyLock<Arc<rustls::ClientConfig>> = LazyLock::new(|| {
    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let config = rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    Arc::new(config)
});

/// An established DNS-over-TLS connection to one upstream.
pub struct DotConnection {
    stream: TlsStream<TcpStream>,
    server: SocketAddr,
}

#[async_trait]
impl Exchange for DotConnection {
    async fn exchange(&mut self, query: &[u8], timeout: Duration) -> Result<Vec<u8>, DomainError> {
        tokio::time::timeout(timeout, send_with_length_prefix(&mut self.stream, query))
            .await
            .map_err(|_| DomainError::TransportTimeout {
                server: self.server.to_string(),
            })??;

        let response = tokio::time::timeout(timeout, read_with_length_prefix(&mut self.stream))
            .await
            .map_err(|_| DomainError::TransportTimeout {
                server: self.server.to_string(),
            })??;

        debug!(server = %self.server, response_len = response.len(), "DoT response received");
        Ok(response)
    }
}

/// Dials DoT connections for one upstream spec.
///
/// With a pinned IP the TCP connection goes to `ip:port` and the hostname is
/// used for SNI and certificate validation only; otherwise the hostname is
/// resolved by the system and dialed directly.
pub struct TlsDialer {
    spec: UpstreamSpec,
    connect_timeout: Duration,
}

impl TlsDialer {
    pub fn new(spec: UpstreamSpec, connect_timeout: Duration) -> Self {
        Self {
            spec,
            connect_timeout,
        }
    }

    async fn connect_tcp(&self) -> Result<TcpStream, DomainError> {
        let attempt = match self.spec.ip {
            Some(ip) => TcpStream::connect(SocketAddr::new(ip, self.spec.port)).await,
            None => TcpStream::connect((&*self.spec.hostname, self.spec.port)).await,
        };
        attempt.map_err(|e| DomainError::TransportConnectionRefused {
            server: self.endpoint(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl Dialer for TlsDialer {
    async fn dial(&self) -> Result<Box<dyn Exchange>, DomainError> {
        let connector = tokio_rustls::TlsConnector::from(SHARED_TLS_CONFIG.clone());

        let server_name = ServerName::try_from(self.spec.hostname.to_string())
            .map_err(|_| DomainError::InvalidTlsHostname(self.spec.hostname.to_string()))?;

        let tcp_stream = tokio::time::timeout(self.connect_timeout, self.connect_tcp())
            .await
            .map_err(|_| DomainError::TransportTimeout {
                server: self.endpoint(),
            })??;

        let server = tcp_stream
            .peer_addr()
            .map_err(|e| DomainError::IoError(e.to_string()))?;

        let stream = tokio::time::timeout(
            self.connect_timeout,
            connector.connect(server_name, tcp_stream),
        )
        .await
        .map_err(|_| DomainError::TransportTimeout {
            server: self.endpoint(),
        })?
        .map_err(|e| DomainError::TlsHandshake {
            server: self.endpoint(),
            reason: e.to_string(),
        })?;

        debug!(server = %server, sni = %self.spec.hostname, "DoT connection established");
        Ok(Box::new(DotConnection { stream, server }))
    }

    fn endpoint(&self) -> String {
        self.spec.to_string()
    }
}
