use crate::PeerAddr;

/// Errors reported by a [`Transport`](crate::Transport) implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The radio is off or the listening endpoint could not be created.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The adapter has no secondary connection strategy.
    #[error("no fallback connection strategy")]
    FallbackUnsupported,

    #[error("unknown peer {0}")]
    UnknownPeer(PeerAddr),
}

/// Errors returned by the public [`LinkManager`](crate::LinkManager) API.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("invalid peer address: {0}")]
    InvalidPeerAddr(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unavailable() {
        let err = TransportError::Unavailable("adapter disabled".into());
        assert_eq!(err.to_string(), "transport unavailable: adapter disabled");
    }

    #[test]
    fn display_unknown_peer() {
        let peer: PeerAddr = "00:11:22:AA:BB:CC".parse().unwrap();
        let err = TransportError::UnknownPeer(peer);
        assert_eq!(err.to_string(), "unknown peer 00:11:22:AA:BB:CC");
    }

    #[test]
    fn transport_error_wraps_into_link_error() {
        let err: LinkError = TransportError::FallbackUnsupported.into();
        assert_eq!(
            err.to_string(),
            "transport error: no fallback connection strategy"
        );
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TransportError::from(io);
        assert!(matches!(err, TransportError::Io(_)));
        assert_eq!(err.to_string(), "i/o error: refused");
    }
}
