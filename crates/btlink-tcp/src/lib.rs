//! TCP transport adapter for btlink.
//!
//! Stands in for the radio so [`btlink_core::LinkManager`] can run end to end
//! on ordinary sockets. Peers are identified by the same 6-byte
//! [`PeerAddr`](btlink_core::PeerAddr) the radio would use, mapped to socket
//! addresses through a [`PeerTable`].

mod error;
mod handshake;
mod table;
mod transport;

pub use error::{TableError, TcpError};
pub use table::{PeerEntry, PeerTable};
pub use transport::TcpTransport;
