use std::net::SocketAddr;
use std::path::Path;

use btlink_core::{PeerAddr, PeerInfo};

use crate::TableError;

/// One reachable peer: its link address and where to find it on the network.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PeerEntry {
    pub addr: PeerAddr,
    #[serde(default)]
    pub name: Option<String>,
    /// Bonded peers are listed by `saved_peers`; the rest only show up in scans.
    #[serde(default = "default_bonded")]
    pub bonded: bool,
    pub primary: SocketAddr,
    /// Secondary address tried once when the primary refuses.
    #[serde(default)]
    pub fallback: Option<SocketAddr>,
}

fn default_bonded() -> bool {
    true
}

impl PeerEntry {
    pub fn new(addr: PeerAddr, primary: SocketAddr) -> Self {
        Self {
            addr,
            name: None,
            bonded: true,
            primary,
            fallback: None,
        }
    }

    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            addr: self.addr,
            name: self.name.clone(),
            bonded: self.bonded,
        }
    }
}

/// The adapter's view of the neighbourhood, usually loaded from JSON:
///
/// ```json
/// { "peers": [
///     { "addr": "00:1A:7D:DA:71:13", "name": "bench", "primary": "127.0.0.1:7301" }
/// ] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PeerTable {
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
}

impl PeerTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TableError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| TableError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, TableError> {
        let table: Self = serde_json::from_str(raw)?;
        let mut seen = std::collections::HashSet::new();
        for entry in &table.peers {
            if !seen.insert(entry.addr) {
                return Err(TableError::Duplicate(entry.addr));
            }
        }
        Ok(table)
    }

    pub fn get(&self, addr: &PeerAddr) -> Option<&PeerEntry> {
        self.peers.iter().find(|e| e.addr == *addr)
    }

    /// Insert or replace the entry for `entry.addr`.
    pub fn upsert(&mut self, entry: PeerEntry) {
        match self.peers.iter_mut().find(|e| e.addr == entry.addr) {
            Some(existing) => *existing = entry,
            None => self.peers.push(entry),
        }
    }

    pub fn bonded(&self) -> impl Iterator<Item = &PeerEntry> {
        self.peers.iter().filter(|e| e.bonded)
    }
}
