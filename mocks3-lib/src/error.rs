use std::{fmt, time::Duration};

use rama::error::BoxError;

/// Failure modes of a single emulated transfer.
///
/// A transfer either fully succeeds or fails with exactly one of these.
/// Negative residual sleeps are never an error, they are clamped to zero.
#[derive(Debug)]
pub enum TransferError {
    /// Unknown operation, size outside the accepted range or invalid
    /// configuration. Never retried.
    InvalidInput(String),
    /// The request deadline expired before the transfer completed.
    Timeout(Duration),
    /// Connection refused, broken stream or unexpected HTTP status.
    Transport(BoxError),
    /// The peer answered, but with a malformed or inconsistent response.
    Protocol(String),
}

impl TransferError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn transport(err: impl Into<BoxError>) -> Self {
        Self::Transport(err.into())
    }

    #[inline(always)]
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, Self::InvalidInput(_))
    }

    #[inline(always)]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferError::InvalidInput(msg) => write!(f, "TransferError: invalid input: {msg}"),
            TransferError::Timeout(deadline) => {
                write!(f, "TransferError: deadline of {deadline:?} exceeded")
            }
            TransferError::Transport(err) => write!(f, "TransferError: transport: {err}"),
            TransferError::Protocol(msg) => write!(f, "TransferError: protocol: {msg}"),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TransferError::Transport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_helpers() {
        assert!(TransferError::invalid_input("size").is_invalid_input());
        assert!(!TransferError::invalid_input("size").is_timeout());
        assert!(TransferError::Timeout(Duration::from_secs(1)).is_timeout());
        assert!(!TransferError::protocol("short read").is_timeout());
    }

    #[test]
    fn test_transport_error_exposes_source() {
        let err = TransferError::transport(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!("refused", source.to_string());
        assert!(err.to_string().contains("transport: refused"));
    }
}
