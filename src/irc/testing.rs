//! In-memory IRC server plumbing for unit tests.

use std::io;
use std::net::Ipv6Addr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};

use super::transport::{Connector, IrcStream};

/// Hands every connection attempt to the test as the server end of a duplex.
pub(crate) struct MemoryConnector {
    accepted: mpsc::UnboundedSender<Accepted>,
}

/// One accepted connection, server side.
pub(crate) struct Accepted {
    pub source: Option<Ipv6Addr>,
    pub lines: Framed<DuplexStream, LinesCodec>,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Accepted>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { accepted: tx }), rx)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, source: Option<Ipv6Addr>) -> io::Result<IrcStream> {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let lines = Framed::new(server, LinesCodec::new());
        self.accepted
            .send(Accepted { source, lines })
            .map_err(|_| io::Error::new(io::ErrorKind::ConnectionRefused, "no listener"))?;
        Ok(Box::new(client))
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

impl Accepted {
    /// Next line from the client, skipping keepalive `PING`s.
    pub async fn recv(&mut self) -> String {
        loop {
            match self.lines.next().await {
                Some(Ok(line)) if line.starts_with("PING ") => continue,
                Some(Ok(line)) => return line,
                other => panic!("connection ended: {other:?}"),
            }
        }
    }

    pub async fn send(&mut self, line: &str) {
        self.lines.send(line).await.unwrap();
    }
}
