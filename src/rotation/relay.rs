//! Fixed-address listener that relays each connection to the live worker.

use super::addr::Address;
use crate::error::{Result, StoveError};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

pub const BUF_SIZE: usize = 8192;
const LISTEN_BACKLOG: u32 = 1024;
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// The upstream address new connections are relayed to.
///
/// Only the owner of the `LivePointer` can move it; readers get a
/// [`LiveTarget`] that always observes a whole value.
#[derive(Debug)]
pub struct LivePointer {
    tx: watch::Sender<Option<Address>>,
}

impl LivePointer {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn set(&self, address: Address) {
        let previous = self.tx.send_replace(Some(address.clone()));
        debug!(from = ?previous.map(|a| a.to_string()), to = %address, "Live pointer updated");
    }

    pub fn get(&self) -> Option<Address> {
        self.tx.borrow().clone()
    }

    pub fn target(&self) -> LiveTarget {
        LiveTarget {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for LivePointer {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of a [`LivePointer`].
#[derive(Debug, Clone)]
pub struct LiveTarget {
    rx: watch::Receiver<Option<Address>>,
}

impl LiveTarget {
    /// Snapshot of the current upstream.
    pub fn current(&self) -> Option<Address> {
        self.rx.borrow().clone()
    }
}

/// Byte counts of one relayed connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub request_bytes: usize,
    pub response_bytes: usize,
}

pub struct RelayListener {
    listener: TcpListener,
    target: LiveTarget,
    client_timeout: Duration,
}

impl RelayListener {
    /// Bind `addr` with address reuse enabled so a restarted stove does not
    /// trip over sockets in TIME_WAIT.
    pub async fn bind(addr: &str, target: LiveTarget) -> Result<Self> {
        let socket_addr = tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
            StoveError::Config(format!("'{}' did not resolve to any address", addr))
        })?;

        let socket = match socket_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(socket_addr)?;
        let listener = socket.listen(LISTEN_BACKLOG)?;

        Ok(Self {
            listener,
            target,
            client_timeout: DEFAULT_CLIENT_TIMEOUT,
        })
    }

    /// Longest wait for each chunk of a client's request.
    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept and relay connections one at a time until `shutdown` resolves.
    /// A connection still being relayed at shutdown is dropped.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        info!("Hosting at {}", self.local_addr()?);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                conn = self.listener.accept() => {
                    let (stream, peer) = match conn {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!("Accept error: {}", e);
                            continue;
                        }
                    };
                    tokio::select! {
                        _ = self.handle_connection(stream, peer) => {}
                        _ = &mut shutdown => {
                            info!(%peer, "Relay listener stopping, dropping connection in flight");
                            break;
                        }
                    }
                }
                _ = &mut shutdown => {
                    info!("Relay listener stopping");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        trace!(%peer, "New connection accepted");

        let Some(upstream) = self.target.current() else {
            warn!(%peer, "{}, dropping connection", StoveError::NoUpstream);
            return;
        };

        match relay(stream, &upstream, self.client_timeout).await {
            Ok(stats) if stats.request_bytes == 0 => {
                trace!(%peer, "Client closed without sending a request")
            }
            Ok(stats) => debug!(
                %peer,
                upstream = %upstream,
                request_bytes = stats.request_bytes,
                response_bytes = stats.response_bytes,
                "Connection relayed"
            ),
            Err(e) => warn!(%peer, upstream = %upstream, "Relay failed: {}", e),
        }
    }
}

/// Relay one request/response exchange between `client` and `upstream`.
///
/// The request is forwarded in chunks until a short or empty read; the
/// response is collected until the upstream closes and written back in one go.
/// A client that closes before sending anything never reaches the upstream
/// reply phase, and each client read gives up after `client_timeout`.
pub async fn relay(
    mut client: TcpStream,
    upstream: &Address,
    client_timeout: Duration,
) -> Result<RelayStats> {
    let mut outbound = TcpStream::connect((upstream.host.as_str(), upstream.port)).await?;
    let mut buf = vec![0u8; BUF_SIZE];
    let mut stats = RelayStats::default();
    let mut client_closed = false;

    loop {
        let n = match tokio::time::timeout(client_timeout, client.read(&mut buf)).await {
            Ok(read) => read?,
            Err(_) => {
                return Err(StoveError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("client sent nothing for {:?}", client_timeout),
                )));
            }
        };
        if n == 0 {
            client_closed = true;
            break;
        }
        outbound.write_all(&buf[..n]).await?;
        stats.request_bytes += n;
        if n < BUF_SIZE {
            break;
        }
    }

    if stats.request_bytes == 0 {
        return Ok(stats);
    }
    if client_closed {
        outbound.shutdown().await?;
    }

    let mut response = Vec::new();
    loop {
        let n = outbound.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
    }
    drop(outbound);

    stats.response_bytes = response.len();
    client.write_all(&response).await?;
    client.flush().await?;
    client.shutdown().await?;

    Ok(stats)
}
