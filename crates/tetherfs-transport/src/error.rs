use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {addr} failed: {reason}")]
    ConnectionFailed { addr: String, reason: String },

    #[error("connection {conn_id} to {hostname} lost")]
    ConnectionLost { hostname: String, conn_id: u8 },

    #[error("no pool for host {0}")]
    UnknownHost(String),

    #[error("unknown op code: {0}")]
    UnknownOpcode(u8),

    #[error("frame too short: {len} bytes")]
    ShortFrame { len: usize },

    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("payload codec error for op {op}: {reason}")]
    Codec { op: u8, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages_non_empty() {
        let errors = [
            TransportError::ConnectionFailed {
                addr: "h1:8080".to_string(),
                reason: "refused".to_string(),
            },
            TransportError::ConnectionLost {
                hostname: "h1".to_string(),
                conn_id: 2,
            },
            TransportError::UnknownHost("h2".to_string()),
            TransportError::UnknownOpcode(99),
            TransportError::ShortFrame { len: 3 },
            TransportError::Codec {
                op: 0,
                reason: "truncated".to_string(),
            },
        ];
        for err in errors {
            assert!(!err.to_string().is_empty());
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        let err: TransportError = io_err.into();
        assert!(matches!(err, TransportError::Io(_)));
    }
}
