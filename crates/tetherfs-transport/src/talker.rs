//! Request multiplexer over pooled agent connections.
//!
//! One talker serves the whole process. Per remote it keeps an atomic id
//! counter, a pool of N connections and a pending-request table keyed by
//! `(conn_id, id)`. Each connection gets an egress worker that stamps and
//! writes queued requests and an ingress worker that routes response
//! packets back to the waiting caller. A single timer task pings every
//! connection of every pool.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::conn::{ConnectConfig, Connection};
use crate::error::{Result, TransportError};
use crate::frame::{Opcode, Packet};
use crate::message::{Payload, RemoteRoot};
use crate::pool::{ConnectionPool, PendingRequest, EGRESS_QUEUE_DEPTH};

/// Talker configuration.
#[derive(Debug, Clone)]
pub struct TalkerConfig {
    /// Connections per remote.
    pub conn_count: usize,
    /// Interval between keepalive pings.
    pub keepalive_interval: Duration,
    /// Connection establishment settings.
    pub connect: ConnectConfig,
}

impl Default for TalkerConfig {
    fn default() -> Self {
        Self {
            conn_count: 2,
            keepalive_interval: Duration::from_secs(30),
            connect: ConnectConfig::default(),
        }
    }
}

/// Hook for agent-initiated request packets arriving on a pool connection.
///
/// The client itself never expects these; the default behavior (no handler
/// installed) is to drop them after logging.
pub trait RequestHandler: Send + Sync + 'static {
    /// Called off the ingress worker for each incoming request packet.
    fn handle(&self, hostname: &str, packet: Packet);
}

type PendingMap = HashMap<(u8, u64), mpsc::Sender<Result<Packet>>>;

struct RemoteState {
    hostname: String,
    id_counter: AtomicU64,
    pending: Mutex<PendingMap>,
    pool: ConnectionPool,
}

impl RemoteState {
    /// Fails every outstanding request on connection `index` and marks it
    /// dead. Called by whichever worker observes the transport error first.
    async fn fail_connection(&self, index: u8, alive: &AtomicBool) {
        alive.store(false, Ordering::Release);
        let victims: Vec<mpsc::Sender<Result<Packet>>> = {
            let mut pending = self.pending.lock().unwrap();
            let keys: Vec<(u8, u64)> = pending
                .keys()
                .filter(|(conn_id, _)| *conn_id == index)
                .copied()
                .collect();
            keys.iter().filter_map(|k| pending.remove(k)).collect()
        };
        if !victims.is_empty() {
            warn!(
                hostname = %self.hostname,
                conn_id = index,
                outstanding = victims.len(),
                "failing outstanding requests on lost connection"
            );
        }
        for tx in victims {
            let _ = tx
                .send(Err(TransportError::ConnectionLost {
                    hostname: self.hostname.clone(),
                    conn_id: index,
                }))
                .await;
        }
    }
}

/// The process-wide RPC transport.
pub struct Talker {
    remotes: HashMap<String, Arc<RemoteState>>,
    keepalive: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for Talker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Talker")
            .field("remotes", &self.remotes.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Talker {
    /// Opens `config.conn_count` connections to every remote root and
    /// spawns the per-connection workers. A failed handshake is fatal:
    /// the whole startup errors out.
    pub async fn connect(
        roots: &[RemoteRoot],
        config: TalkerConfig,
        handler: Option<Arc<dyn RequestHandler>>,
    ) -> Result<Self> {
        let mut remotes = HashMap::new();

        for root in roots {
            if remotes.contains_key(&root.hostname) {
                continue;
            }
            let addr = root.address();
            let mut pool = ConnectionPool::new();
            let mut workers = Vec::new();

            for _ in 0..config.conn_count {
                let conn = Arc::new(Connection::connect(&addr, &config.connect).await?);
                let (tx, rx) = mpsc::channel(EGRESS_QUEUE_DEPTH);
                let alive = Arc::new(AtomicBool::new(true));
                let index = pool.append(conn.clone(), tx, alive.clone());
                workers.push((index, conn, rx, alive));
            }

            let state = Arc::new(RemoteState {
                hostname: root.hostname.clone(),
                id_counter: AtomicU64::new(0),
                pending: Mutex::new(HashMap::new()),
                pool,
            });

            for (index, conn, rx, alive) in workers {
                info!(hostname = %state.hostname, conn_id = index, "starting connection workers");
                tokio::spawn(egress_worker(state.clone(), conn.clone(), rx, alive.clone(), index));
                tokio::spawn(ingress_worker(
                    state.clone(),
                    conn,
                    alive,
                    index,
                    handler.clone(),
                ));
            }

            remotes.insert(root.hostname.clone(), state);
        }

        let keepalive = tokio::spawn(keepalive_loop(
            remotes.values().cloned().collect::<Vec<_>>(),
            config.keepalive_interval,
        ));

        Ok(Self { remotes, keepalive })
    }

    /// Submits a request on a uniformly random live connection of the
    /// remote's pool and returns the channel its response arrives on.
    ///
    /// Most callers want [`send_request`](Self::send_request); this is the
    /// entry point for ops whose response is a packet stream.
    pub async fn submit(
        &self,
        op: Opcode,
        hostname: &str,
        payload: Payload,
    ) -> Result<mpsc::Receiver<Result<Packet>>> {
        let state = self
            .remotes
            .get(hostname)
            .ok_or_else(|| TransportError::UnknownHost(hostname.to_string()))?;

        let live = state.pool.live_indices();
        if live.is_empty() {
            return Err(TransportError::ConnectionLost {
                hostname: hostname.to_string(),
                conn_id: 0,
            });
        }
        let index = live[rand::thread_rng().gen_range(0..live.len())];

        let (tx, rx) = mpsc::channel(1);
        state
            .pool
            .egress(index)
            .send(PendingRequest {
                packet: Packet::request(op, payload),
                reply: tx,
            })
            .await
            .map_err(|_| TransportError::ConnectionLost {
                hostname: hostname.to_string(),
                conn_id: index,
            })?;
        Ok(rx)
    }

    /// Submits a request and blocks until its single response packet
    /// arrives. The response may carry an error record; classifying it is
    /// the caller's business.
    pub async fn send_request(
        &self,
        op: Opcode,
        hostname: &str,
        payload: Payload,
    ) -> Result<Packet> {
        let mut rx = self.submit(op, hostname, payload).await?;
        match rx.recv().await {
            Some(result) => result,
            None => Err(TransportError::ConnectionLost {
                hostname: hostname.to_string(),
                conn_id: 0,
            }),
        }
    }

    /// True if a pool exists for `hostname`.
    pub fn has_remote(&self, hostname: &str) -> bool {
        self.remotes.contains_key(hostname)
    }

    /// Outstanding request count for a remote, across its connections.
    pub fn pending_count(&self, hostname: &str) -> usize {
        self.remotes
            .get(hostname)
            .map(|s| s.pending.lock().unwrap().len())
            .unwrap_or(0)
    }
}

impl Drop for Talker {
    fn drop(&mut self) {
        self.keepalive.abort();
    }
}

/// Drains one connection's egress queue: stamps connection index and
/// request id, records the pending entry, writes the frame.
async fn egress_worker(
    state: Arc<RemoteState>,
    conn: Arc<Connection>,
    mut rx: mpsc::Receiver<PendingRequest>,
    alive: Arc<AtomicBool>,
    index: u8,
) {
    while let Some(req) = rx.recv().await {
        let mut pkt = req.packet;
        pkt.conn_id = index;
        pkt.id = state.id_counter.fetch_add(1, Ordering::Relaxed) + 1;

        debug!(
            hostname = %state.hostname,
            conn_id = index,
            id = pkt.id,
            op = ?pkt.op,
            "sending packet"
        );

        state
            .pending
            .lock()
            .unwrap()
            .insert((index, pkt.id), req.reply.clone());

        if let Err(e) = conn.send_packet(&pkt).await {
            warn!(
                hostname = %state.hostname,
                conn_id = index,
                id = pkt.id,
                error = %e,
                "packet write failed"
            );
            state.pending.lock().unwrap().remove(&(index, pkt.id));
            let _ = req
                .reply
                .send(Err(TransportError::ConnectionLost {
                    hostname: state.hostname.clone(),
                    conn_id: index,
                }))
                .await;
            state.fail_connection(index, &alive).await;
            break;
        }
    }

    // Fail whatever was queued behind the failure point.
    while let Ok(req) = rx.try_recv() {
        let _ = req
            .reply
            .send(Err(TransportError::ConnectionLost {
                hostname: state.hostname.clone(),
                conn_id: index,
            }))
            .await;
    }
    debug!(hostname = %state.hostname, conn_id = index, "egress worker stopped");
}

/// Reads frames off one connection. Responses are routed through the
/// pending table; request packets go to the handler hook. Read and decode
/// failures terminate the worker after failing everything outstanding on
/// this connection.
async fn ingress_worker(
    state: Arc<RemoteState>,
    conn: Arc<Connection>,
    alive: Arc<AtomicBool>,
    index: u8,
    handler: Option<Arc<dyn RequestHandler>>,
) {
    loop {
        let pkt = match conn.recv_packet().await {
            Ok(p) => p,
            Err(e) => {
                warn!(
                    hostname = %state.hostname,
                    conn_id = index,
                    error = %e,
                    "connection read failed"
                );
                state.fail_connection(index, &alive).await;
                break;
            }
        };

        debug!(
            hostname = %state.hostname,
            conn_id = index,
            id = pkt.id,
            op = ?pkt.op,
            request = pkt.is_request(),
            "received packet"
        );

        if pkt.is_request() {
            match &handler {
                Some(h) => {
                    let h = h.clone();
                    let hostname = state.hostname.clone();
                    tokio::spawn(async move { h.handle(&hostname, pkt) });
                }
                None => debug!(hostname = %state.hostname, "dropping agent-initiated request"),
            }
            continue;
        }

        let key = (pkt.conn_id, pkt.id);
        let sender = {
            let mut pending = state.pending.lock().unwrap();
            // A fetch response is a chunk stream: the entry stays until the
            // final chunk so every chunk reaches the same caller.
            let mid_stream = matches!(&pkt.data, Payload::Chunk(c) if !c.is_last());
            if mid_stream {
                pending.get(&key).cloned()
            } else {
                pending.remove(&key)
            }
        };

        match sender {
            Some(tx) => {
                let _ = tx.send(Ok(pkt)).await;
            }
            None => {
                // Pongs land here: pings carry no pending entry.
                debug!(
                    hostname = %state.hostname,
                    conn_id = pkt.conn_id,
                    id = pkt.id,
                    op = ?pkt.op,
                    "no pending entry for response"
                );
            }
        }
    }
}

/// Writes a ping on every live connection of every pool at each tick.
/// Write failure is logged, never fatal.
async fn keepalive_loop(remotes: Vec<Arc<RemoteState>>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await; // the immediate first tick

    loop {
        ticker.tick().await;
        for state in &remotes {
            for index in state.pool.live_indices() {
                let ping = Packet {
                    id: 0,
                    op: Opcode::Ping,
                    conn_id: index,
                    flags: 0,
                    data: Payload::Empty,
                };
                match state.pool.connection(index).send_packet(&ping).await {
                    Ok(()) => debug!(hostname = %state.hostname, conn_id = index, "ping sent"),
                    Err(e) => warn!(
                        hostname = %state.hostname,
                        conn_id = index,
                        error = %e,
                        "ping failed"
                    ),
                }
            }
        }
    }
}
