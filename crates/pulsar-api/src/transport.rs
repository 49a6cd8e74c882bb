// TCP transport to the RS-485 → Ethernet converter.
//
// The dialer carries the connect and per-frame I/O timeouts; every
// transport it produces inherits them. Frames are optionally traced
// under the `pulsar::protocol` target.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

use crate::device::{Dialer, Transport};
use crate::error::Error;

/// Tracing target for raw protocol frames.
pub const PROTOCOL_TARGET: &str = "pulsar::protocol";

/// Shared transport configuration for dialing the converter.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub connect_timeout: Duration,
    pub rw_timeout: Duration,
    /// Trace every frame as hex at debug level.
    pub log_protocol: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            rw_timeout: Duration::from_secs(10),
            log_protocol: false,
        }
    }
}

// ── TcpDialer ────────────────────────────────────────────────────────

/// Dials plain TCP connections with the configured connect timeout.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    config: TransportConfig,
}

impl TcpDialer {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl Dialer for TcpDialer {
    type Transport = TcpTransport;

    async fn dial(&self, socket: &str) -> Result<TcpTransport, Error> {
        debug!(socket, "dialing converter");
        let connect = TcpStream::connect(socket);
        let stream = match tokio::time::timeout(self.config.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(Error::Connect {
                    socket: socket.to_owned(),
                    source,
                });
            }
            Err(_) => {
                return Err(Error::ConnectTimeout {
                    socket: socket.to_owned(),
                    timeout_ms: millis(self.config.connect_timeout),
                });
            }
        };
        stream.set_nodelay(true)?;
        Ok(TcpTransport::new(stream, socket, &self.config))
    }
}

// ── TcpTransport ─────────────────────────────────────────────────────

/// Cloneable handle to one TCP connection.
///
/// All clones share the same stream; after [`close`](Transport::close)
/// every clone reports [`Error::Closed`].
#[derive(Debug, Clone)]
pub struct TcpTransport {
    stream: Arc<Mutex<Option<TcpStream>>>,
    peer: Arc<str>,
    rw_timeout: Duration,
    log_protocol: bool,
}

impl TcpTransport {
    fn new(stream: TcpStream, peer: &str, config: &TransportConfig) -> Self {
        Self {
            stream: Arc::new(Mutex::new(Some(stream))),
            peer: Arc::from(peer),
            rw_timeout: config.rw_timeout,
            log_protocol: config.log_protocol,
        }
    }

    /// The socket address this transport was dialed to.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Write a whole request frame.
    pub async fn send(&self, frame: &[u8]) -> Result<(), Error> {
        if self.log_protocol {
            debug!(target: PROTOCOL_TARGET, peer = %self.peer, frame = %hex::encode(frame), "tx");
        }
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(Error::Closed)?;
        self.bounded(stream.write_all(frame)).await
    }

    /// Read whatever the device has sent, up to `buf.len()` bytes.
    ///
    /// A zero-length read means the peer hung up and is reported as
    /// [`Error::Closed`].
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(Error::Closed)?;
        let n = self.bounded(stream.read(buf)).await?;
        if n == 0 {
            return Err(Error::Closed);
        }
        if self.log_protocol {
            debug!(target: PROTOCOL_TARGET, peer = %self.peer, frame = %hex::encode(&buf[..n]), "rx");
        }
        Ok(n)
    }

    async fn bounded<T>(&self, io: impl Future<Output = std::io::Result<T>>) -> Result<T, Error> {
        match tokio::time::timeout(self.rw_timeout, io).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(Error::Timeout {
                timeout_ms: millis(self.rw_timeout),
            }),
        }
    }
}

impl Transport for TcpTransport {
    async fn close(&self) -> Result<(), Error> {
        let Some(mut stream) = self.stream.lock().await.take() else {
            return Ok(());
        };
        debug!(peer = %self.peer, "closing transport");
        stream.shutdown().await?;
        Ok(())
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
