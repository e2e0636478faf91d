use std::fmt;
use std::str::FromStr;

use crate::LinkError;

/// Transport-assigned address of a remote device.
///
/// Six bytes, displayed and parsed as `AA:BB:CC:DD:EE:FF`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerAddr([u8; 6]);

impl PeerAddr {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

impl fmt::Debug for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddr({self})")
    }
}

impl FromStr for PeerAddr {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LinkError::InvalidPeerAddr(s.to_string());

        let mut bytes = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(invalid)?;
            // from_str_radix alone would take a sign.
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self(bytes))
    }
}

impl serde::Serialize for PeerAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for PeerAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A peer as reported by the transport: address plus whatever it knows.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PeerInfo {
    pub addr: PeerAddr,
    #[serde(default)]
    pub name: Option<String>,
    /// Already paired with this device.
    #[serde(default)]
    pub bonded: bool,
}

impl PeerInfo {
    pub fn new(addr: PeerAddr) -> Self {
        Self {
            addr,
            name: None,
            bonded: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn bonded(mut self, bonded: bool) -> Self {
        self.bonded = bonded;
        self
    }

    /// Name if known, otherwise the address.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.addr.to_string(),
        }
    }
}
