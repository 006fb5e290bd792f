// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # heartlink-ble
//!
//! A cross-platform Rust library for discovering Bluetooth Low Energy
//! fitness sensors, keeping a resilient connection to them, and decoding
//! heart-rate telemetry.
//!
//! ## Features
//!
//! - **Device Discovery**: Fixed-window scans filtered to supported
//!   services, deduplicated by device identifier
//! - **Resilient Connections**: Periodic health checks reconnect dropped
//!   devices and re-run your post-connect actions in order
//! - **Characteristic Monitoring**: Resolve services and characteristics
//!   by short or full UUID and stream their notifications
//! - **Heart Rate Decoding**: 8-bit and 16-bit Heart Rate Measurement values
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use heartlink_ble::{DeviceManager, MonitorConfiguration, Result};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let manager = DeviceManager::new().await?;
//!     manager.wait_for_powered_on(Duration::from_secs(10)).await?;
//!
//!     let devices = manager.scan(Duration::from_secs(5)).await;
//!     let Some(device) = devices.first() else {
//!         return Ok(());
//!     };
//!
//!     let heart_rate = MonitorConfiguration::heart_rate(|measurement| {
//!         if let Ok(measurement) = measurement {
//!             println!("Heart rate: {} bpm", measurement.value);
//!         }
//!     });
//!
//!     let handle = manager
//!         .connect_and_monitor(device, vec![heart_rate], None, None)
//!         .await?;
//!
//!     tokio::time::sleep(Duration::from_secs(30)).await;
//!     handle.disconnect().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data and config types

// Public modules
pub mod ble;
pub mod config;
pub mod data;
pub mod device_manager;
pub mod error;
pub mod protocol;
pub mod subscription;

// Re-exports for convenience
pub use device_manager::{DeviceManager, MonitorHandle};
pub use error::{Error, Result};
pub use subscription::Subscription;

// Re-export commonly used types from submodules
pub use ble::adapter::{PowerState, RadioAdapter, RadioDevice};
pub use ble::characteristics::{CharacteristicMonitor, MonitorConfiguration};
pub use ble::connection::{ConnectionEvent, ConnectionManager, ConnectionState, DeviceObserver};
pub use ble::scanner::DeviceScanner;
pub use config::{Config, ConnectionConfig, ScanConfig};
pub use data::DeviceRecord;
pub use protocol::{decode, HeartRateMeasurement, ValueFormat};
