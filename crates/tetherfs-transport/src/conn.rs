//! TCP connection carrying length-prefixed packets.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use crate::error::{Result, TransportError};
use crate::frame::{Packet, MAX_PACKET_SIZE};

/// Connection establishment configuration.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Dial timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Whether to set TCP_NODELAY.
    pub nodelay: bool,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5000,
            nodelay: true,
        }
    }
}

/// A single connection to a remote agent, usable concurrently from one
/// reader task and one writer task.
pub struct Connection {
    read: Mutex<OwnedReadHalf>,
    write: Mutex<OwnedWriteHalf>,
    peer_addr: String,
}

impl Connection {
    /// Dials `addr` and performs TCP setup.
    pub async fn connect(addr: &str, config: &ConnectConfig) -> Result<Self> {
        let timeout = std::time::Duration::from_millis(config.connect_timeout_ms);
        let stream = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectionFailed {
                addr: addr.to_string(),
                reason: format!("timed out after {}ms", config.connect_timeout_ms),
            })?
            .map_err(|e| TransportError::ConnectionFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        if config.nodelay {
            stream.set_nodelay(true).map_err(TransportError::Io)?;
        }
        tracing::debug!(addr, "connected");
        Ok(Self::from_stream(stream))
    }

    /// Wraps an accepted stream; used by mock agents in tests.
    pub fn from_stream(stream: tokio::net::TcpStream) -> Self {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let (read, write) = stream.into_split();
        Self {
            read: Mutex::new(read),
            write: Mutex::new(write),
            peer_addr,
        }
    }

    /// Writes one packet, length-prefixed.
    pub async fn send_packet(&self, packet: &Packet) -> Result<()> {
        let body = packet.encode()?;
        if body.len() > MAX_PACKET_SIZE {
            return Err(TransportError::FrameTooLarge {
                len: body.len(),
                max: MAX_PACKET_SIZE,
            });
        }
        let mut write = self.write.lock().await;
        write
            .write_all(&(body.len() as u32).to_be_bytes())
            .await
            .map_err(TransportError::Io)?;
        write.write_all(&body).await.map_err(TransportError::Io)?;
        write.flush().await.map_err(TransportError::Io)?;
        Ok(())
    }

    /// Reads one packet, blocking until a full frame is available.
    pub async fn recv_packet(&self) -> Result<Packet> {
        let mut read = self.read.lock().await;
        let mut len_buf = [0u8; 4];
        read.read_exact(&mut len_buf)
            .await
            .map_err(TransportError::Io)?;
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_PACKET_SIZE {
            return Err(TransportError::FrameTooLarge {
                len,
                max: MAX_PACKET_SIZE,
            });
        }
        let mut body = vec![0u8; len];
        read.read_exact(&mut body)
            .await
            .map_err(TransportError::Io)?;
        Packet::decode(&body)
    }

    /// Remote peer address.
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}
