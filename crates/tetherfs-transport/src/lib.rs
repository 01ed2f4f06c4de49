#![warn(missing_docs)]

//! tetherfs transport subsystem: pooled TCP connections per remote agent,
//! binary packet protocol, request multiplexing with `(conn_id, id)`
//! response routing.

/// TCP connection carrying length-prefixed packets.
pub mod conn;
/// Transport error types.
pub mod error;
/// Packet header codec and op-switched payload dispatch.
pub mod frame;
/// Wire message records shared with the agent.
pub mod message;
/// Per-remote connection pool and egress queues.
pub mod pool;
/// Request multiplexer: id assignment, pending table, workers, keepalive.
pub mod talker;

pub use conn::{ConnectConfig, Connection};
pub use error::{Result, TransportError};
pub use frame::{Opcode, Packet, FLAG_RESPONSE, PACKET_HEADER_SIZE};
pub use message::{
    attr_valid, AttrInfo, CloseInfo, CreateInfo, DirInfo, ErrorKind, ErrorMsg, FileChunk,
    FileStat, OpenInfo, Payload, ReadDirInfo, ReadInfo, RemotePath, RemoteRoot, RenameInfo,
    WriteInfo, WriteResult,
};
pub use talker::{RequestHandler, Talker, TalkerConfig};
