//! BLE scanning functionality.
//!
//! Provides the scanner for discovering devices within a fixed window.

use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use crate::ble::adapter::RadioAdapter;
use crate::config::ScanConfig;
use crate::data::DeviceRecord;

/// Devices collected by a single scan.
///
/// Holds at most one record per identifier. A repeated identifier replaces
/// the earlier record but keeps its position, so devices come out in the
/// order they were first discovered.
#[derive(Debug, Default)]
pub struct ScanSession {
    index: HashMap<String, usize>,
    devices: Vec<DeviceRecord>,
}

impl ScanSession {
    /// Create an empty session.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record. Returns `true` if the identifier is new.
    pub fn record(&mut self, record: DeviceRecord) -> bool {
        match self.index.get(&record.identifier) {
            Some(&position) => {
                self.devices[position] = record;
                false
            }
            None => {
                self.index
                    .insert(record.identifier.clone(), self.devices.len());
                self.devices.push(record);
                true
            }
        }
    }

    /// Get the current record for an identifier.
    pub fn get(&self, identifier: &str) -> Option<&DeviceRecord> {
        self.index.get(identifier).map(|&i| &self.devices[i])
    }

    /// Number of unique devices seen.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Check if no device has been seen.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Consume the session, returning the deduplicated devices.
    pub fn into_devices(self) -> Vec<DeviceRecord> {
        self.devices
    }
}

/// Scanner for discovering devices that advertise supported services.
pub struct DeviceScanner {
    /// The radio to scan with.
    adapter: Arc<dyn RadioAdapter>,
    /// Service filter and default window.
    config: ScanConfig,
    /// Serializes scans against the shared adapter.
    scan_lock: tokio::sync::Mutex<()>,
}

impl DeviceScanner {
    /// Create a new scanner.
    pub fn new(adapter: Arc<dyn RadioAdapter>, config: ScanConfig) -> Self {
        Self {
            adapter,
            config,
            scan_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Get the scanner configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Scan for the configured default window.
    pub async fn scan_default(&self) -> Vec<DeviceRecord> {
        self.scan(self.config.default_duration).await
    }

    /// Scan for `duration` and return the devices found.
    ///
    /// The window always runs to completion. Errors reported during the
    /// scan are logged and skipped. If the scan cannot be started at all,
    /// an empty list is returned.
    ///
    /// Devices come back in first-discovery order. A repeated identifier
    /// keeps its first position while its record is replaced by the latest
    /// advertisement.
    ///
    /// Concurrent calls on the same scanner run one after another; each
    /// call gets its own session.
    pub async fn scan(&self, duration: Duration) -> Vec<DeviceRecord> {
        let _guard = self.scan_lock.lock().await;

        info!("Starting BLE scan for {:?}", duration);

        let mut events = match self.adapter.start_scan(&self.config.service_filter).await {
            Ok(events) => events,
            Err(e) => {
                warn!("Error starting scan: {}", e);
                return Vec::new();
            }
        };

        let mut session = ScanSession::new();
        let window = tokio::time::sleep(duration);
        tokio::pin!(window);
        let mut events_open = true;

        loop {
            tokio::select! {
                _ = &mut window => break,
                event = events.next(), if events_open => match event {
                    Some(Ok(record)) => {
                        trace!("Device reported: {}", record);
                        if session.record(record) {
                            debug!("Discovered {} device(s)", session.len());
                        }
                    }
                    Some(Err(e)) => {
                        warn!("Error scanning for devices: {}", e);
                    }
                    None => {
                        debug!("Scan event stream ended before the window elapsed");
                        events_open = false;
                    }
                },
            }
        }

        drop(events);

        if let Err(e) = self.adapter.stop_scan().await {
            warn!("Error stopping scan: {}", e);
        }

        let devices = session.into_devices();
        info!("Scan finished, found {} device(s)", devices.len());
        devices
    }
}
