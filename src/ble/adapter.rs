//! Radio capability traits.
//!
//! Everything above this module talks to the radio through [`RadioAdapter`]
//! and [`RadioDevice`]. [`BtleplugAdapter`](super::btleplug_adapter::BtleplugAdapter)
//! is the platform implementation; tests substitute their own.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::Arc;
use uuid::Uuid;

use crate::data::DeviceRecord;
use crate::error::Result;

/// Stream of discovery events. Errors are delivered in-band so one bad
/// event does not end the scan.
pub type ScanStream = BoxStream<'static, Result<DeviceRecord>>;

/// Stream of characteristic notifications.
///
/// `Ok(None)` is a notification without a payload.
pub type NotificationStream = BoxStream<'static, Result<Option<Bytes>>>;

/// Radio power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PowerState {
    /// State not yet known.
    #[default]
    Unknown,
    /// The radio is restarting.
    Resetting,
    /// The platform has no usable BLE radio.
    Unsupported,
    /// The application is not allowed to use the radio.
    Unauthorized,
    /// The radio is switched off.
    PoweredOff,
    /// The radio is on and ready.
    PoweredOn,
}

impl PowerState {
    /// Check if the radio is ready for scanning and connections.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::PoweredOn)
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::Resetting => write!(f, "Resetting"),
            Self::Unsupported => write!(f, "Unsupported"),
            Self::Unauthorized => write!(f, "Unauthorized"),
            Self::PoweredOff => write!(f, "PoweredOff"),
            Self::PoweredOn => write!(f, "PoweredOn"),
        }
    }
}

/// Adapter-level radio operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadioAdapter: Send + Sync {
    /// Current power state of the radio.
    async fn power_state(&self) -> Result<PowerState>;

    /// Stream of power state changes.
    async fn power_state_changes(&self) -> Result<BoxStream<'static, PowerState>>;

    /// Start scanning for devices advertising any of `services`.
    async fn start_scan(&self, services: &[Uuid]) -> Result<ScanStream>;

    /// Stop an active scan.
    async fn stop_scan(&self) -> Result<()>;

    /// Get a handle to a previously discovered device.
    async fn device(&self, identifier: &str) -> Result<Arc<dyn RadioDevice>>;
}

/// Per-device radio operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RadioDevice: Send + Sync {
    /// Platform identifier of the device.
    fn identifier(&self) -> String;

    /// Establish a connection.
    async fn connect(&self) -> Result<()>;

    /// Tear down the connection.
    async fn cancel_connection(&self) -> Result<()>;

    /// Check if the device is currently connected.
    async fn is_connected(&self) -> Result<bool>;

    /// Discover every service and characteristic on the device.
    async fn discover_all_services_and_characteristics(&self) -> Result<()>;

    /// UUIDs of the discovered services.
    async fn services(&self) -> Result<Vec<Uuid>>;

    /// UUIDs of the characteristics under a discovered service.
    async fn characteristics_for_service(&self, service: Uuid) -> Result<Vec<Uuid>>;

    /// Enable notifications on a characteristic and stream them.
    async fn monitor_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream>;

    /// Stream that yields once for every device-originated disconnect.
    async fn disconnections(&self) -> Result<BoxStream<'static, ()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state() {
        assert!(PowerState::PoweredOn.is_ready());
        assert!(!PowerState::PoweredOff.is_ready());
        assert!(!PowerState::default().is_ready());
        assert_eq!(PowerState::PoweredOn.to_string(), "PoweredOn");
    }
}
