//! IRC transport: address resolution, source binding and TLS.
//!
//! Every connection attempt resolves the configured host afresh and picks one
//! of the returned addresses at random, so a round-robin DNS name spreads
//! puppet connections over all servers instead of pinning them to the first
//! record. Puppet connections bind their own IPv6 source address first; the
//! main session lets the kernel choose.
//!
//! Port 6697 is the conventional TLS port and switches TLS on.

use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpSocket, TcpStream};
use tokio_rustls::rustls;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};

/// Port on which IRC networks conventionally serve TLS.
pub const TLS_PORT: u16 = 6697;

/// Combined async read+write trait for type-erased IRC streams.
pub trait IrcTransport: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> IrcTransport for T {}

/// A connected stream ready for framing with `IrcCodec`.
///
/// Plain `TcpStream`, `TlsStream<TcpStream>`, and in tests
/// `tokio::io::DuplexStream` all fit.
pub type IrcStream = Box<dyn IrcTransport>;

/// Opens connections to the IRC network.
///
/// Connection tasks only ever see this trait, which lets tests hand them
/// in-memory streams instead of sockets.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection, bound to `source` when given.
    async fn connect(&self, source: Option<Ipv6Addr>) -> io::Result<IrcStream>;

    /// `host:port` for log lines and status text.
    fn describe(&self) -> String;
}

/// Connects over TCP, with TLS on [`TLS_PORT`].
pub struct TcpConnector {
    host: String,
    port: u16,
    tls: Option<TlsConnector>,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let tls = (port == TLS_PORT).then(tls_connector);
        Self {
            host: host.into(),
            port,
            tls,
        }
    }

    pub fn uses_tls(&self) -> bool {
        self.tls.is_some()
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, source: Option<Ipv6Addr>) -> io::Result<IrcStream> {
        let candidates = resolve(&self.host, self.port, source.is_some()).await?;
        let addr = pick_random(&candidates).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no usable addresses for {}", self.host),
            )
        })?;
        debug!(host = %self.host, %addr, candidates = candidates.len(), "transport: picked address");

        let tcp = open(addr, source).await?;

        match &self.tls {
            Some(connector) => {
                let server_name = rustls::pki_types::ServerName::try_from(self.host.clone())
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
                let stream = connector.connect(server_name, tcp).await?;
                info!(host = %self.host, %addr, ?source, "transport: connected (TLS)");
                Ok(Box::new(stream))
            }
            None => {
                info!(host = %self.host, %addr, ?source, "transport: connected");
                Ok(Box::new(tcp))
            }
        }
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn tls_connector() -> TlsConnector {
    let roots = rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Resolve `host` to every candidate socket address.
///
/// IP literals (bracketed or not) skip DNS. With `ipv6_only`, IPv4 results
/// are dropped, since an IPv6 source address cannot reach them.
pub async fn resolve(host: &str, port: u16, ipv6_only: bool) -> io::Result<Vec<SocketAddr>> {
    let cleaned = host.trim_start_matches('[').trim_end_matches(']');
    let addrs: Vec<SocketAddr> = match cleaned.parse::<IpAddr>() {
        Ok(ip) => vec![SocketAddr::new(ip, port)],
        Err(_) => tokio::net::lookup_host((cleaned, port)).await?.collect(),
    };

    let addrs: Vec<SocketAddr> = addrs
        .into_iter()
        .filter(|a| !ipv6_only || a.is_ipv6())
        .collect();

    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no addresses found for {host}"),
        ));
    }
    Ok(addrs)
}

/// Pick one candidate uniformly at random.
pub fn pick_random(addrs: &[SocketAddr]) -> Option<SocketAddr> {
    addrs.choose(&mut rand::thread_rng()).copied()
}

async fn open(addr: SocketAddr, source: Option<Ipv6Addr>) -> io::Result<TcpStream> {
    match source {
        Some(source) => {
            let socket = TcpSocket::new_v6()?;
            socket.bind(SocketAddr::new(IpAddr::V6(source), 0))?;
            socket.connect(addr).await
        }
        None => TcpStream::connect(addr).await,
    }
}
