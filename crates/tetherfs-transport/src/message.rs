//! Wire message types for the tetherfs agent protocol.
//!
//! One record per payload-carrying op. Records are serialized with bincode;
//! the op code in the packet header selects which record to decode on ingress.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};
use crate::frame::Opcode;

/// Serialize a payload record to bytes using bincode.
pub fn serialize_payload<T: Serialize>(op: Opcode, msg: &T) -> Result<Vec<u8>> {
    bincode::serialize(msg).map_err(|e| TransportError::Codec {
        op: op as u8,
        reason: e.to_string(),
    })
}

/// Deserialize a payload record using bincode.
pub fn deserialize_payload<T: DeserializeOwned>(op: Opcode, data: &[u8]) -> Result<T> {
    bincode::deserialize(data).map_err(|e| TransportError::Codec {
        op: op as u8,
        reason: e.to_string(),
    })
}

/// A file or directory on a remote agent: `(hostname, port, path)`.
///
/// Immutable once constructed; a rename replaces the owning node's value
/// with a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemotePath {
    /// Agent hostname. Also identifies the connection pool.
    pub hostname: String,
    /// Agent port.
    pub port: u16,
    /// Absolute path on the agent side.
    pub path: String,
}

impl RemotePath {
    /// Builds a remote path.
    pub fn new(hostname: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            path: path.into(),
        }
    }

    /// `hostname:port`, the dial address of the owning agent.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// A sibling path with `name` appended to this path.
    pub fn join(&self, name: &str) -> Self {
        let path = if self.path.ends_with('/') {
            format!("{}{}", self.path, name)
        } else {
            format!("{}/{}", self.path, name)
        };
        Self {
            hostname: self.hostname.clone(),
            port: self.port,
            path,
        }
    }
}

/// A mount subtree exported by a remote agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRoot {
    /// Agent hostname; unique across roots, identifies the pool.
    pub hostname: String,
    /// Agent port.
    pub port: u16,
    /// Remote-side path that is the root of this mount.
    pub path: String,
}

impl RemoteRoot {
    /// `hostname:port` dial address.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    /// The `RemotePath` of the root itself.
    pub fn root_path(&self) -> RemotePath {
        RemotePath::new(self.hostname.clone(), self.port, self.path.clone())
    }
}

/// Directory enumeration through an open handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadDirInfo {
    pub path: RemotePath,
    /// Descriptor returned when the directory was opened.
    pub fd: u64,
}

/// Read a byte range through an open remote file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadInfo {
    pub path: RemotePath,
    pub fd: u64,
    pub offset: i64,
    pub size: u32,
}

/// Write a byte range through an open remote file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteInfo {
    pub path: RemotePath,
    pub fd: u64,
    pub offset: i64,
    pub data: Vec<u8>,
}

/// Which fields of an [`AttrInfo`] are meaningful.
pub mod attr_valid {
    /// `size` carries a truncation target.
    pub const SIZE: u32 = 1 << 0;
    /// `mode` carries a permission change.
    pub const MODE: u32 = 1 << 1;
    /// `atime_nanos` is meaningful.
    pub const ATIME: u32 = 1 << 2;
    /// `mtime_nanos` is meaningful.
    pub const MTIME: u32 = 1 << 3;
}

/// Attribute change request. `valid` is a bitset of [`attr_valid`] flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttrInfo {
    pub path: RemotePath,
    pub valid: u32,
    pub size: u64,
    pub mode: u32,
    pub atime_nanos: i64,
    pub mtime_nanos: i64,
}

/// Create a file or directory under `base_dir`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateInfo {
    pub base_dir: RemotePath,
    pub name: String,
    /// Directory creation when set; plain file otherwise.
    pub is_dir: bool,
}

/// Move `path` to `dest_path` on the same agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenameInfo {
    pub path: RemotePath,
    /// Absolute destination path on the agent side.
    pub dest_path: String,
}

/// Open a remote file or directory.
///
/// The descriptor is allocated by the client and echoed in subsequent
/// read/write/close requests; the agent keys its open-file state by it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenInfo {
    pub path: RemotePath,
    pub fd: u64,
    pub flags: i32,
}

/// Close a previously opened descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseInfo {
    pub path: RemotePath,
    pub fd: u64,
}

/// One stat record: the response to an attr request and the element type
/// of a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileStat {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    /// Permission bits, no file-type bits.
    pub mode: u32,
    /// Modification time, nanoseconds since epoch.
    pub mtime_nanos: i64,
}

impl Default for FileStat {
    fn default() -> Self {
        Self {
            name: String::new(),
            is_dir: false,
            size: 0,
            mode: 0o644,
            mtime_nanos: 0,
        }
    }
}

/// Directory listing response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirInfo {
    pub stats: Vec<FileStat>,
}

/// One chunk of a fetched file. A fetch response is a sequence of chunks
/// delivered on the same response channel; `index + 1 == total` marks the
/// final chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChunk {
    pub index: u64,
    pub total: u64,
    pub data: Vec<u8>,
}

impl FileChunk {
    /// True for the last chunk of the stream.
    pub fn is_last(&self) -> bool {
        self.index + 1 >= self.total
    }
}

/// Numeric acknowledgement: bytes written for a write, the agent-side
/// descriptor for an open, zero for plain acks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteResult {
    pub size: u64,
}

/// Agent error classification, mapped to an errno at the VFS boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    NotEmpty,
    NotDirectory,
    IsDirectory,
    Io,
    Other,
}

/// Error response; may stand in for any response record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorMsg {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The op-selected payload of a packet.
///
/// Decode is a switch on the op code ([`crate::frame::decode_payload`]);
/// encode serializes the inner record.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Attr, ReadDirAll, FetchFile and Remove requests.
    Path(RemotePath),
    /// ReadDir request.
    ReadDir(ReadDirInfo),
    /// ReadFile request.
    Read(ReadInfo),
    /// WriteFile request.
    Write(WriteInfo),
    /// SetAttr request.
    Attr(AttrInfo),
    /// Create request (files and directories).
    Create(CreateInfo),
    /// Rename request.
    Rename(RenameInfo),
    /// Open request.
    Open(OpenInfo),
    /// Close request.
    Close(CloseInfo),
    /// Stat response.
    Stat(FileStat),
    /// DirInfo response.
    Dir(DirInfo),
    /// FileData response chunk.
    Chunk(FileChunk),
    /// WriteResult response.
    WriteResult(WriteResult),
    /// Error response.
    Error(ErrorMsg),
    /// Ping and Pong control frames.
    Empty,
}

impl Payload {
    /// The error record, when this payload is one.
    pub fn as_error(&self) -> Option<&ErrorMsg> {
        match self {
            Payload::Error(e) => Some(e),
            _ => None,
        }
    }
}
