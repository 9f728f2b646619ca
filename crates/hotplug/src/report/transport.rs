//! Collector connection: endpoint parsing, TCP and mutual TLS

use crate::error::ReportError;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use std::fmt;
use std::fs::File;
use std::future::Future;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

/// Write half of an established collector connection
pub type ReportStream = Box<dyn AsyncWrite + Send + Unpin>;

pub type ConnectFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ReportStream, ReportError>> + Send + 'a>>;

/// Opens the byte stream events are written to
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> ConnectFuture<'_>;

    /// Human readable peer description for logs
    fn describe(&self) -> String;
}

/// Parsed `tcp://<host>:<port>` collector URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn parse(url: &str) -> Result<Self, ReportError> {
        let invalid = |reason| ReportError::InvalidEndpoint {
            url: url.to_string(),
            reason,
        };

        let rest = url
            .strip_prefix("tcp://")
            .ok_or_else(|| invalid("expected tcp://<host>:<port>"))?;

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, tail) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| invalid("missing port"))?;
            (host, port)
        } else {
            rest.rsplit_once(':').ok_or_else(|| invalid("missing port"))?
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }
        let port: u16 = port.parse().map_err(|_| invalid("invalid port"))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "tcp://[{}]:{}", self.host, self.port)
        } else {
            write!(f, "tcp://{}:{}", self.host, self.port)
        }
    }
}

/// Plain TCP, optionally wrapped in a mutually authenticated TLS session
pub struct TcpConnector {
    endpoint: Endpoint,
    enable_ipv6: bool,
    tls: Option<(TlsConnector, ServerName<'static>)>,
}

impl TcpConnector {
    pub fn plain(endpoint: Endpoint, enable_ipv6: bool) -> Self {
        Self {
            endpoint,
            enable_ipv6,
            tls: None,
        }
    }

    /// TLS client trusting `server_cert` and presenting the chain and key in
    /// `client_cert`
    pub fn mutual_tls(
        endpoint: Endpoint,
        enable_ipv6: bool,
        server_cert: &Path,
        client_cert: &Path,
    ) -> Result<Self, ReportError> {
        let config = client_tls_config(server_cert, client_cert)?;
        let name = ServerName::try_from(endpoint.host.clone())
            .map_err(|e| ReportError::Tls(format!("invalid server name '{}': {}", endpoint.host, e)))?;

        Ok(Self {
            endpoint,
            enable_ipv6,
            tls: Some((TlsConnector::from(Arc::new(config)), name)),
        })
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    async fn resolve(&self) -> Result<Vec<SocketAddr>, ReportError> {
        let addrs: Vec<SocketAddr> =
            tokio::net::lookup_host((self.endpoint.host.as_str(), self.endpoint.port))
                .await
                .map_err(|e| ReportError::Resolve(format!("{}: {}", self.endpoint.host, e)))?
                .filter(|addr| self.enable_ipv6 || addr.is_ipv4())
                .collect();

        if addrs.is_empty() {
            return Err(ReportError::Resolve(format!(
                "no usable address for {}{}",
                self.endpoint.host,
                if self.enable_ipv6 { "" } else { " (IPv6 disabled)" }
            )));
        }
        Ok(addrs)
    }

    async fn connect_tcp(&self) -> Result<TcpStream, ReportError> {
        let mut last_err = None;
        for addr in self.resolve().await? {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!("Connected to collector at {}", addr);
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .map(ReportError::Io)
            .unwrap_or_else(|| ReportError::Resolve(self.endpoint.host.clone())))
    }
}

impl Connector for TcpConnector {
    fn connect(&self) -> ConnectFuture<'_> {
        Box::pin(async move {
            let tcp = self.connect_tcp().await?;
            match &self.tls {
                None => Ok(Box::new(tcp) as ReportStream),
                Some((connector, name)) => {
                    let stream = connector
                        .connect(name.clone(), tcp)
                        .await
                        .map_err(|e| ReportError::Tls(format!("handshake failed: {}", e)))?;
                    debug!("TLS session established with {}", self.endpoint);
                    Ok(Box::new(stream) as ReportStream)
                }
            }
        })
    }

    fn describe(&self) -> String {
        if self.is_tls() {
            format!("{} (mutual TLS)", self.endpoint)
        } else {
            self.endpoint.to_string()
        }
    }
}

fn client_tls_config(server_cert: &Path, client_cert: &Path) -> Result<ClientConfig, ReportError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(server_cert)? {
        roots
            .add(cert)
            .map_err(|e| ReportError::Tls(format!("{}: {}", server_cert.display(), e)))?;
    }

    let chain = load_certs(client_cert)?;
    let key = load_private_key(client_cert)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ReportError::Tls(e.to_string()))?
        .with_root_certificates(roots)
        .with_client_auth_cert(chain, key)
        .map_err(|e| ReportError::Tls(format!("{}: {}", client_cert.display(), e)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ReportError> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ReportError::Tls(format!("{}: {}", path.display(), e)))?;

    if certs.is_empty() {
        return Err(ReportError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ReportError> {
    let mut reader = BufReader::new(File::open(path)?);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| ReportError::Tls(format!("{}: {}", path.display(), e)))?
        .ok_or_else(|| ReportError::Tls(format!("no private key found in {}", path.display())))
}
