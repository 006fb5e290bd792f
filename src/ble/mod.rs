//! BLE communication module.
//!
//! This module provides the radio abstraction, scanning, connection
//! management and characteristic monitoring.

pub mod adapter;
pub mod btleplug_adapter;
pub mod characteristics;
pub mod connection;
pub mod scanner;
pub mod uuids;

pub use adapter::{NotificationStream, PowerState, RadioAdapter, RadioDevice, ScanStream};
pub use btleplug_adapter::{BtleplugAdapter, BtleplugDevice};
pub use characteristics::{CharacteristicMonitor, DataSink, ErrorSink, MonitorConfiguration};
pub use connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, DeviceObserver, ReconnectCallback,
};
pub use scanner::{DeviceScanner, ScanSession};
pub use uuids::*;
