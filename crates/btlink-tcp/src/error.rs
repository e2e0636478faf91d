use std::net::SocketAddr;

use btlink_core::PeerAddr;

/// Problems loading a [`PeerTable`](crate::PeerTable).
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    #[error("cannot read peer table {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("malformed peer table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("peer {0} listed twice")]
    Duplicate(PeerAddr),
}

/// Errors from constructing or binding a [`TcpTransport`](crate::TcpTransport).
#[derive(Debug, thiserror::Error)]
pub enum TcpError {
    #[error("no tokio runtime available")]
    NoRuntime,

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error(transparent)]
    Table(#[from] TableError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_bind() {
        let err = TcpError::Bind {
            addr: "127.0.0.1:7301".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "cannot bind 127.0.0.1:7301: in use");
    }

    #[test]
    fn table_error_is_transparent() {
        let err: TcpError = TableError::Duplicate(PeerAddr::new([0, 0, 0, 0, 0, 1])).into();
        assert_eq!(err.to_string(), "peer 00:00:00:00:00:01 listed twice");
    }
}
