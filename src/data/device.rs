//! Discovered device records.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ble::uuids::service_names;

/// Snapshot of a device as reported by one discovery event.
///
/// Records are immutable. When the same device is seen again during a
/// scan, the newer record replaces the older one.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceRecord {
    /// Platform identifier of the device (stable for the adapter's lifetime).
    pub identifier: String,
    /// Advertised local name, if any.
    pub name: Option<String>,
    /// Advertised service UUIDs.
    pub service_uuids: Vec<Uuid>,
    /// Signal strength in dBm.
    pub rssi: Option<i16>,
    /// When this snapshot was taken.
    pub last_seen: DateTime<Utc>,
}

impl DeviceRecord {
    /// Create a record stamped with the current time.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            name: None,
            service_uuids: Vec::new(),
            rssi: None,
            last_seen: Utc::now(),
        }
    }

    /// Set the advertised name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the advertised service UUIDs.
    pub fn with_services(mut self, service_uuids: Vec<Uuid>) -> Self {
        self.service_uuids = service_uuids;
        self
    }

    /// Set the signal strength.
    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = Some(rssi);
        self
    }

    /// Name to show in device lists.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown device")
    }

    /// Check if the device advertises the given service.
    pub fn advertises(&self, service: &Uuid) -> bool {
        self.service_uuids.contains(service)
    }

    /// Human-readable names of the well-known advertised services.
    pub fn service_names(&self) -> Vec<&'static str> {
        service_names(&self.service_uuids)
    }
}

impl std::fmt::Display for DeviceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.display_name(), self.identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::uuids::{BATTERY_SERVICE_UUID, HEART_RATE_SERVICE_UUID};

    #[test]
    fn test_display_name_fallback() {
        let record = DeviceRecord::new("AA:BB:CC:DD:EE:FF");
        assert_eq!(record.display_name(), "Unknown device");
        assert_eq!(record.to_string(), "Unknown device - AA:BB:CC:DD:EE:FF");

        let record = record.with_name("Polar H10");
        assert_eq!(record.display_name(), "Polar H10");
    }

    #[test]
    fn test_advertised_services() {
        let record = DeviceRecord::new("dev")
            .with_services(vec![HEART_RATE_SERVICE_UUID])
            .with_rssi(-60);

        assert!(record.advertises(&HEART_RATE_SERVICE_UUID));
        assert!(!record.advertises(&BATTERY_SERVICE_UUID));
        assert_eq!(record.service_names(), vec!["Heart Rate"]);
        assert_eq!(record.rssi, Some(-60));
    }
}
