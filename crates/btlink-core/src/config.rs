use uuid::Uuid;

use crate::LinkError;

/// Service record UUID both sides agree on.
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0xfa87c0d0_afac_11de_8a39_0800200c9a66);

/// Service record name advertised by the listening endpoint.
pub const DEFAULT_SERVICE_NAME: &str = "btlinkSecure";

/// Configuration for a [`LinkManager`](crate::LinkManager).
///
/// ```rust
/// use btlink_core::LinkConfig;
///
/// let config = LinkConfig::new()
///     .service_name("sensor-bridge")
///     .read_buffer(4096);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub(crate) service_name: String,
    pub(crate) service_uuid: Uuid,
    /// Size of the session's reusable read buffer.
    pub(crate) read_buffer: usize,
    /// How many [`LinkEvent::BytesReceived`](crate::LinkEvent::BytesReceived)
    /// may wait unread before the session stops reading.
    pub(crate) event_buffer: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkConfig {
    /// Defaults, with the service UUID taken from `BTLINK_SERVICE_UUID`
    /// when that variable holds a valid UUID.
    pub fn new() -> Self {
        let service_uuid = std::env::var("BTLINK_SERVICE_UUID")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SERVICE_UUID);

        Self {
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            service_uuid,
            read_buffer: 1024,
            event_buffer: 256,
        }
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn service_uuid(mut self, uuid: Uuid) -> Self {
        self.service_uuid = uuid;
        self
    }

    pub fn read_buffer(mut self, bytes: usize) -> Self {
        self.read_buffer = bytes;
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    pub fn get_service_name(&self) -> &str {
        &self.service_name
    }

    pub fn get_service_uuid(&self) -> Uuid {
        self.service_uuid
    }

    pub fn validate(&self) -> Result<(), LinkError> {
        if self.service_name.trim().is_empty() {
            return Err(LinkError::Config("service name is empty".into()));
        }
        if self.read_buffer == 0 {
            return Err(LinkError::Config("read buffer must be non-zero".into()));
        }
        if self.event_buffer == 0 {
            return Err(LinkError::Config("event buffer must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uuid_matches_service_record() {
        assert_eq!(
            DEFAULT_SERVICE_UUID.to_string(),
            "fa87c0d0-afac-11de-8a39-0800200c9a66"
        );
    }

    #[test]
    fn builder_overrides() {
        let uuid = Uuid::new_v4();
        let config = LinkConfig::new()
            .service_name("bridge")
            .service_uuid(uuid)
            .read_buffer(16)
            .event_buffer(4);
        assert_eq!(config.get_service_name(), "bridge");
        assert_eq!(config.get_service_uuid(), uuid);
        assert_eq!(config.read_buffer, 16);
        assert_eq!(config.event_buffer, 4);
    }

    #[test]
    fn validate_rejects_zero_buffers() {
        assert!(LinkConfig::new().read_buffer(0).validate().is_err());
        assert!(LinkConfig::new().event_buffer(0).validate().is_err());
        assert!(LinkConfig::new().service_name("  ").validate().is_err());
        assert!(LinkConfig::new().validate().is_ok());
    }
}
