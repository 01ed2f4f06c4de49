//! Per-remote connection pool.
//!
//! A pool owns the N live connections to one agent plus, for each
//! connection, the bounded egress queue its sender worker drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::conn::Connection;
use crate::error::Result;
use crate::frame::Packet;

/// Capacity of each per-connection egress queue.
pub const EGRESS_QUEUE_DEPTH: usize = 100;

/// A queued submission: the packet to stamp-and-send and the channel the
/// response (or transport failure) is delivered on.
///
/// The reply channel is bounded at capacity 1; a fetch response streams
/// several packets through it in sequence, every other op delivers exactly
/// one.
pub struct PendingRequest {
    pub packet: Packet,
    pub reply: mpsc::Sender<Result<Packet>>,
}

/// The set of live connections to one remote agent.
pub struct ConnectionPool {
    connections: Vec<Arc<Connection>>,
    egress: Vec<mpsc::Sender<PendingRequest>>,
    alive: Vec<Arc<AtomicBool>>,
}

impl ConnectionPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self {
            connections: Vec::new(),
            egress: Vec::new(),
            alive: Vec::new(),
        }
    }

    /// Appends a connection and its egress queue; returns its index.
    pub fn append(
        &mut self,
        conn: Arc<Connection>,
        egress: mpsc::Sender<PendingRequest>,
        alive: Arc<AtomicBool>,
    ) -> u8 {
        self.connections.push(conn);
        self.egress.push(egress);
        self.alive.push(alive);
        (self.connections.len() - 1) as u8
    }

    /// Number of connections in the pool.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// True when the pool holds no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// The connection at `index`.
    pub fn connection(&self, index: u8) -> &Arc<Connection> {
        &self.connections[index as usize]
    }

    /// The egress queue of the connection at `index`.
    pub fn egress(&self, index: u8) -> &mpsc::Sender<PendingRequest> {
        &self.egress[index as usize]
    }

    /// Whether the connection at `index` is still usable.
    pub fn is_alive(&self, index: u8) -> bool {
        self.alive[index as usize].load(Ordering::Acquire)
    }

    /// Indices of connections still marked alive.
    pub fn live_indices(&self) -> Vec<u8> {
        (0..self.connections.len() as u8)
            .filter(|&i| self.is_alive(i))
            .collect()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn loopback_pair() -> (Arc<Connection>, tokio::net::TcpStream) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let client = tokio::spawn(async move {
            Connection::connect(&addr, &crate::conn::ConnectConfig::default())
                .await
                .unwrap()
        });
        let (server, _) = listener.accept().await.unwrap();
        (Arc::new(client.await.unwrap()), server)
    }

    #[tokio::test]
    async fn test_append_and_len() {
        let mut pool = ConnectionPool::new();
        assert!(pool.is_empty());

        let (conn_a, _srv_a) = loopback_pair().await;
        let (conn_b, _srv_b) = loopback_pair().await;
        let (tx_a, _rx_a) = mpsc::channel(EGRESS_QUEUE_DEPTH);
        let (tx_b, _rx_b) = mpsc::channel(EGRESS_QUEUE_DEPTH);

        let idx_a = pool.append(conn_a, tx_a, Arc::new(AtomicBool::new(true)));
        let idx_b = pool.append(conn_b, tx_b, Arc::new(AtomicBool::new(true)));

        assert_eq!(idx_a, 0);
        assert_eq!(idx_b, 1);
        assert_eq!(pool.len(), 2);
        assert!(pool.is_alive(0));
        assert!(pool.is_alive(1));
    }

    #[tokio::test]
    async fn test_live_indices_skip_dead() {
        let mut pool = ConnectionPool::new();
        let (conn_a, _srv_a) = loopback_pair().await;
        let (conn_b, _srv_b) = loopback_pair().await;
        let (tx_a, _rx_a) = mpsc::channel(EGRESS_QUEUE_DEPTH);
        let (tx_b, _rx_b) = mpsc::channel(EGRESS_QUEUE_DEPTH);

        let dead = Arc::new(AtomicBool::new(true));
        pool.append(conn_a, tx_a, dead.clone());
        pool.append(conn_b, tx_b, Arc::new(AtomicBool::new(true)));

        dead.store(false, Ordering::Release);
        assert_eq!(pool.live_indices(), vec![1]);
    }
}
