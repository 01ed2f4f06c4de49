use tetherfs_transport::{ErrorKind, ErrorMsg, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FsError {
    #[error("agent error: {message}")]
    Remote { kind: ErrorKind, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("no such entry: inode {ino}")]
    NoEntry { ino: u64 },

    #[error("not a directory: inode {ino}")]
    NotDirectory { ino: u64 },

    #[error("is a directory: inode {ino}")]
    IsDirectory { ino: u64 },

    #[error("unknown descriptor: {fd}")]
    BadDescriptor { fd: u64 },

    #[error("unexpected response payload for {op}")]
    UnexpectedResponse { op: &'static str },

    #[error("file not resident in cache: {path}")]
    NotCached { path: String },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, FsError>;

impl FsError {
    pub fn remote(err: &ErrorMsg) -> Self {
        FsError::Remote {
            kind: err.kind,
            message: err.message.clone(),
        }
    }

    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            FsError::Remote { kind, .. } => match kind {
                ErrorKind::NotFound => ENOENT,
                ErrorKind::PermissionDenied => EACCES,
                ErrorKind::AlreadyExists => EEXIST,
                ErrorKind::NotEmpty => ENOTEMPTY,
                ErrorKind::NotDirectory => ENOTDIR,
                ErrorKind::IsDirectory => EISDIR,
                ErrorKind::Io | ErrorKind::Other => EIO,
            },
            FsError::Transport(_) => EIO,
            FsError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            FsError::NoEntry { .. } => ENOENT,
            FsError::NotDirectory { .. } => ENOTDIR,
            FsError::IsDirectory { .. } => EISDIR,
            FsError::BadDescriptor { .. } => EBADF,
            FsError::UnexpectedResponse { .. } => EIO,
            FsError::NotCached { .. } => EIO,
            FsError::Config(_) => EINVAL,
        }
    }
}
