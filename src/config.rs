//! Configuration for scanning and connection monitoring.

use std::time::Duration;
use uuid::Uuid;

use crate::ble::uuids::SUPPORTED_SERVICES;

/// Default interval between connection health checks (5 seconds).
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_millis(5000);

/// Default scan window (5 seconds).
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(5);

/// Default capacity of connection event channels.
pub const DEFAULT_EVENT_BUFFER: usize = 16;

/// Scanner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanConfig {
    /// Services a scan is filtered to.
    pub service_filter: Vec<Uuid>,
    /// Window used when the caller does not pass one.
    pub default_duration: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            service_filter: SUPPORTED_SERVICES.to_vec(),
            default_duration: DEFAULT_SCAN_DURATION,
        }
    }
}

impl ScanConfig {
    /// Replace the service filter.
    pub fn with_service_filter(mut self, services: Vec<Uuid>) -> Self {
        self.service_filter = services;
        self
    }

    /// Replace the default scan window.
    pub fn with_default_duration(mut self, duration: Duration) -> Self {
        self.default_duration = duration;
        self
    }
}

/// Connection manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConnectionConfig {
    /// Interval between connection health checks.
    pub check_interval: Duration,
    /// Capacity of the connection event broadcast channel.
    pub event_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ConnectionConfig {
    /// Replace the health check interval.
    ///
    /// A zero interval is raised to one millisecond since the timer
    /// cannot tick at zero.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Replace the event channel capacity (minimum 1).
    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }
}

/// Top-level configuration for a [`DeviceManager`](crate::DeviceManager).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Scanner settings.
    pub scan: ScanConfig,
    /// Connection manager settings.
    pub connection: ConnectionConfig,
}

impl Config {
    /// Replace the scanner settings.
    pub fn with_scan(mut self, scan: ScanConfig) -> Self {
        self.scan = scan;
        self
    }

    /// Replace the connection settings.
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }
}
