//! Timeout-bounded byte stream session.

use crate::error::ClientError;
use bytes::Bytes;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpSocket, TcpStream};
use tokio::time::Instant;

/// Byte transform applied to outgoing or incoming data.
pub type Transform = Box<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Device host name or address.
    pub host: String,
    /// Device port.
    pub port: u16,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Deadline for each `receive_exactly` call.
    pub read_timeout: Duration,
    /// Local address to bind before connecting.
    pub bind_addr: Option<SocketAddr>,
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            bind_addr: None,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = Some(addr);
        self
    }

    /// Returns `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connected,
    Closed,
}

/// A request/response byte stream to one device.
///
/// Exchanges take `&mut self`, so two exchanges on one session can never
/// interleave. Any failed read or write leaves the stream at an unknown
/// position; the session closes itself and must be connected again before
/// reuse.
pub struct Session<S = TcpStream> {
    config: SessionConfig,
    stream: Option<S>,
    state: SessionState,
    send_transform: Option<Transform>,
    receive_transform: Option<Transform>,
}

impl Session<TcpStream> {
    /// Creates a new session (not yet connected).
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            stream: None,
            state: SessionState::Unconnected,
            send_transform: None,
            receive_transform: None,
        }
    }

    /// Connects to the configured device.
    ///
    /// A closed session may be connected again.
    pub async fn connect(&mut self) -> Result<(), ClientError> {
        if self.state == SessionState::Connected {
            return Ok(());
        }

        let addr = self.config.address();
        tracing::debug!("Connecting to {}...", addr);

        let stream = tokio::time::timeout(self.config.connect_timeout, open_stream(&self.config))
            .await
            .map_err(|_| {
                tracing::debug!("Connection timeout");
                ClientError::Connection {
                    addr: addr.clone(),
                    source: io::Error::new(io::ErrorKind::TimedOut, "connect timed out"),
                }
            })?
            .map_err(|e| {
                tracing::debug!("Connection failed: {}", e);
                ClientError::Connection {
                    addr: addr.clone(),
                    source: e,
                }
            })?;

        stream.set_nodelay(true).ok();
        tracing::debug!("Connected to {}", addr);

        self.stream = Some(stream);
        self.state = SessionState::Connected;
        Ok(())
    }
}

async fn open_stream(config: &SessionConfig) -> io::Result<TcpStream> {
    let host = (config.host.as_str(), config.port);
    let Some(bind_addr) = config.bind_addr else {
        return TcpStream::connect(host).await;
    };

    let mut last_err = None;
    for addr in tokio::net::lookup_host(host).await? {
        if addr.is_ipv4() != bind_addr.is_ipv4() {
            continue;
        }
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.bind(bind_addr)?;
        tracing::debug!("Bound local address {}", bind_addr);

        match socket.connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }

    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no address of {} matches bind address {}", config.address(), bind_addr),
        )
    }))
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an already established stream.
    pub fn from_stream(config: SessionConfig, stream: S) -> Self {
        Self {
            config,
            stream: Some(stream),
            state: SessionState::Connected,
            send_transform: None,
            receive_transform: None,
        }
    }

    /// Sets the transform applied to every outgoing buffer.
    pub fn with_send_transform(mut self, transform: Transform) -> Self {
        self.send_transform = Some(transform);
        self
    }

    /// Sets the transform applied to every received buffer.
    pub fn with_receive_transform(mut self, transform: Transform) -> Self {
        self.receive_transform = Some(transform);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Writes all of `data`, after the send transform.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;

        let transformed;
        let data = match &self.send_transform {
            Some(transform) => {
                transformed = transform(data);
                transformed.as_slice()
            }
            None => data,
        };

        tracing::debug!("Sending {} bytes", data.len());
        let written = match stream.write_all(data).await {
            Ok(()) => stream.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            self.abort(&e);
            return Err(e.into());
        }
        Ok(())
    }

    /// Drops a stream left in an unknown position.
    fn abort(&mut self, reason: &dyn fmt::Display) {
        tracing::debug!("Transport failed ({}), closing session", reason);
        self.stream = None;
        self.state = SessionState::Closed;
    }

    /// Reads exactly `size` bytes within the configured read timeout.
    pub async fn receive_exactly(&mut self, size: usize) -> Result<Bytes, ClientError> {
        let timeout = self.config.read_timeout;
        self.receive_exactly_within(size, timeout).await
    }

    /// Reads exactly `size` bytes within `timeout`, then applies the receive
    /// transform.
    ///
    /// Short reads are accumulated; the deadline is checked after every one.
    pub async fn receive_exactly_within(
        &mut self,
        size: usize,
        timeout: Duration,
    ) -> Result<Bytes, ClientError> {
        let result = self.read_exact_by(size, Instant::now() + timeout).await;

        match result {
            Ok(buf) => {
                let data = match &self.receive_transform {
                    Some(transform) => transform(&buf),
                    None => buf,
                };
                Ok(Bytes::from(data))
            }
            Err(e) => {
                if !matches!(e, ClientError::NotConnected) {
                    self.abort(&e);
                }
                Err(e)
            }
        }
    }

    async fn read_exact_by(&mut self, size: usize, deadline: Instant) -> Result<Vec<u8>, ClientError> {
        let stream = self.stream.as_mut().ok_or(ClientError::NotConnected)?;

        let mut buf = vec![0u8; size];
        let mut received = 0;

        while received < size {
            let n = match tokio::time::timeout_at(deadline, stream.read(&mut buf[received..])).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ClientError::Timeout {
                        expected: size,
                        received,
                    })
                }
            };

            if n == 0 {
                return Err(ClientError::ConnectionClosed);
            }
            received += n;

            if received < size && Instant::now() >= deadline {
                return Err(ClientError::Timeout {
                    expected: size,
                    received,
                });
            }
        }

        tracing::debug!("Received {} bytes", received);
        Ok(buf)
    }

    /// Releases the stream. Safe to call repeatedly.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!("Closing session to {}", self.config.address());
            let _ = stream.shutdown().await;
        }
        if self.state == SessionState::Connected {
            self.state = SessionState::Closed;
        }
        Ok(())
    }
}

impl<S> fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("send_transform", &self.send_transform.is_some())
            .field("receive_transform", &self.receive_transform.is_some())
            .finish()
    }
}
