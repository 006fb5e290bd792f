//! GATT characteristic monitoring.
//!
//! Resolves a service and characteristic on a connected device and
//! forwards its notifications to caller-supplied sinks.

use bytes::Bytes;
use futures::stream::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::adapter::RadioDevice;
use crate::ble::uuids::{
    matches_identifier, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
};
use crate::error::{Error, Result};
use crate::protocol::HeartRateMeasurement;
use crate::subscription::Subscription;

/// Receives notification payloads.
pub type DataSink = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Receives notification errors.
pub type ErrorSink = Arc<dyn Fn(Error) + Send + Sync>;

/// What to monitor and where to deliver it.
///
/// Identifiers are matched as case-insensitive fragments of the UUID, so
/// `"180d"` and `"0000180d-0000-1000-8000-00805f9b34fb"` both select the
/// Heart Rate service.
#[derive(Clone)]
pub struct MonitorConfiguration {
    service: String,
    characteristic: String,
    on_data: DataSink,
    on_error: Option<ErrorSink>,
}

impl MonitorConfiguration {
    /// Create a configuration delivering raw payloads to `on_data`.
    pub fn new<F>(
        service: impl Into<String>,
        characteristic: impl Into<String>,
        on_data: F,
    ) -> Self
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        Self {
            service: service.into(),
            characteristic: characteristic.into(),
            on_data: Arc::new(on_data),
            on_error: None,
        }
    }

    /// Deliver notification errors to `on_error` instead of the log.
    pub fn with_error_handler<F>(mut self, on_error: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(on_error));
        self
    }

    /// Create a configuration that feeds a channel of tagged results.
    pub fn channel(
        service: impl Into<String>,
        characteristic: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<Result<Bytes>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let error_tx = tx.clone();

        let config = Self::new(service, characteristic, move |payload| {
            let _ = tx.send(Ok(payload));
        })
        .with_error_handler(move |e| {
            let _ = error_tx.send(Err(e));
        });

        (config, rx)
    }

    /// Monitor the Heart Rate Measurement characteristic, delivering
    /// decoded measurements (or the error that prevented decoding).
    pub fn heart_rate<F>(on_measurement: F) -> Self
    where
        F: Fn(Result<HeartRateMeasurement>) + Send + Sync + 'static,
    {
        let on_measurement = Arc::new(on_measurement);
        let on_error = on_measurement.clone();

        Self::new(
            HEART_RATE_SERVICE_UUID.to_string(),
            HEART_RATE_MEASUREMENT_UUID.to_string(),
            move |payload| on_measurement(HeartRateMeasurement::parse(&payload)),
        )
        .with_error_handler(move |e| on_error(Err(e)))
    }

    /// The requested service identifier.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The requested characteristic identifier.
    pub fn characteristic(&self) -> &str {
        &self.characteristic
    }

    fn deliver(&self, notification: Result<Option<Bytes>>) {
        match notification {
            Ok(Some(payload)) => (self.on_data)(payload),
            Ok(None) => trace!("Dropping empty notification from {}", self.characteristic),
            Err(e) => match &self.on_error {
                Some(on_error) => on_error(e),
                None => warn!("Notification error on {}: {}", self.characteristic, e),
            },
        }
    }
}

impl std::fmt::Debug for MonitorConfiguration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorConfiguration")
            .field("service", &self.service)
            .field("characteristic", &self.characteristic)
            .field("has_error_handler", &self.on_error.is_some())
            .finish()
    }
}

/// Subscribes to characteristics on one device.
#[derive(Clone)]
pub struct CharacteristicMonitor {
    device: Arc<dyn RadioDevice>,
}

impl CharacteristicMonitor {
    /// Create a monitor for a device.
    pub fn new(device: Arc<dyn RadioDevice>) -> Self {
        Self { device }
    }

    /// Get the device this monitor is bound to.
    pub fn device(&self) -> &Arc<dyn RadioDevice> {
        &self.device
    }

    /// Discover the device and resolve a service/characteristic pair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceNotFound`] or [`Error::CharacteristicNotFound`]
    /// when nothing matches.
    pub async fn resolve(&self, service: &str, characteristic: &str) -> Result<(Uuid, Uuid)> {
        self.device
            .discover_all_services_and_characteristics()
            .await?;

        let services = self.device.services().await?;
        let service_uuid = services
            .iter()
            .copied()
            .find(|uuid| matches_identifier(uuid, service))
            .ok_or_else(|| {
                debug!("Service {} not found, available: {:?}", service, services);
                Error::ServiceNotFound {
                    uuid: service.to_string(),
                }
            })?;

        let characteristics = self.device.characteristics_for_service(service_uuid).await?;
        let characteristic_uuid = characteristics
            .iter()
            .copied()
            .find(|uuid| matches_identifier(uuid, characteristic))
            .ok_or_else(|| {
                debug!(
                    "Characteristic {} not found in {}, available: {:?}",
                    characteristic, service_uuid, characteristics
                );
                Error::CharacteristicNotFound {
                    uuid: characteristic.to_string(),
                }
            })?;

        Ok((service_uuid, characteristic_uuid))
    }

    /// Subscribe to the configured characteristic.
    ///
    /// Returns `Ok(None)` without touching the device if it is not
    /// connected. Otherwise the returned [`Subscription`] keeps the
    /// notifications flowing until it is cancelled or dropped.
    pub async fn subscribe(&self, config: &MonitorConfiguration) -> Result<Option<Subscription>> {
        if !self.device.is_connected().await? {
            debug!(
                "Device {} not connected, skipping subscription to {}",
                self.device.identifier(),
                config.characteristic
            );
            return Ok(None);
        }

        let (service_uuid, characteristic_uuid) = self
            .resolve(&config.service, &config.characteristic)
            .await?;

        let mut notifications = self
            .device
            .monitor_characteristic(service_uuid, characteristic_uuid)
            .await?;

        debug!(
            "Monitoring {} on service {} of {}",
            characteristic_uuid,
            service_uuid,
            self.device.identifier()
        );

        let config = config.clone();
        let handle = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                config.deliver(notification);
            }
            debug!("Notification stream for {} ended", characteristic_uuid);
        });

        Ok(Some(Subscription::for_task(handle)))
    }
}
