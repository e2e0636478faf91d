//! Single-session link manager for RFCOMM-style transports.
//!
//! A device both listens for an inbound connection and may dial a peer at
//! the same time. Whichever stream arrives first becomes the one active
//! session; the losing attempts are closed. Failures fall back to listening
//! so the device stays reachable.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use btlink_core::{LinkConfig, LinkEvent, LinkManager, Transport};
//!
//! # async fn example(transport: Arc<dyn Transport>) -> Result<(), btlink_core::LinkError> {
//! let (link, mut events) = LinkManager::new(transport, LinkConfig::new())?;
//! link.start()?;
//! link.connect("00:1A:7D:DA:71:13".parse()?);
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         LinkEvent::PeerConnected { peer } => {
//!             println!("connected to {peer}");
//!             link.write(b"hello").await;
//!         }
//!         LinkEvent::BytesReceived { data, .. } => println!("{data:?}"),
//!         other => println!("{other:?}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod config;
mod discovery;
mod error;
mod event;
mod manager;
mod peer;
pub mod transport;
mod worker;

#[cfg(test)]
mod proptests;

pub use config::{LinkConfig, DEFAULT_SERVICE_NAME, DEFAULT_SERVICE_UUID};
pub use discovery::DiscoveryScanner;
pub use error::{LinkError, TransportError};
pub use event::{LinkEvent, LinkEvents, LinkState, LinkStats};
pub use manager::LinkManager;
pub use peer::{PeerAddr, PeerInfo};
pub use transport::{ByteStream, DiscoveryEvent, Listener, StreamHandle, Transport};

// Re-exported so adapters implement `Transport` against the same version.
pub use async_trait::async_trait;
pub use uuid::Uuid;
