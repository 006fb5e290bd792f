//! [`RadioAdapter`] implementation on top of btleplug.

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, CentralState, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::ble::adapter::{
    NotificationStream, PowerState, RadioAdapter, RadioDevice, ScanStream,
};
use crate::ble::uuids::service_uuids;
use crate::data::DeviceRecord;
use crate::error::{Error, Result};

/// Platform radio backed by the first btleplug adapter.
#[derive(Clone)]
pub struct BtleplugAdapter {
    adapter: Adapter,
}

impl BtleplugAdapter {
    /// Open the first Bluetooth adapter on this system.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self { adapter })
    }

    /// Wrap a specific btleplug adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    /// Get the underlying adapter.
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    /// Build a record for a peripheral the adapter reported.
    ///
    /// Returns `Ok(None)` when the peripheral has no properties yet or does
    /// not advertise any of the filtered services.
    async fn record_for(
        adapter: &Adapter,
        id: &PeripheralId,
        filter: &[Uuid],
    ) -> Result<Option<DeviceRecord>> {
        let peripheral = adapter.peripheral(id).await.map_err(Error::Bluetooth)?;

        let properties = match peripheral.properties().await.map_err(Error::Bluetooth)? {
            Some(p) => p,
            None => return Ok(None),
        };

        // Some platforms ignore the scan filter, so apply it here as well.
        if !filter.is_empty() && !properties.services.iter().any(|s| filter.contains(s)) {
            trace!("Ignoring {}: no supported service advertised", id);
            return Ok(None);
        }

        let mut record = DeviceRecord::new(id.to_string()).with_services(properties.services);
        record.name = properties.local_name;
        record.rssi = properties.rssi;

        Ok(Some(record))
    }
}

fn power_state_from(state: CentralState) -> PowerState {
    match state {
        CentralState::PoweredOn => PowerState::PoweredOn,
        CentralState::PoweredOff => PowerState::PoweredOff,
        _ => PowerState::Unknown,
    }
}

#[async_trait]
impl RadioAdapter for BtleplugAdapter {
    async fn power_state(&self) -> Result<PowerState> {
        let state = self.adapter.adapter_state().await.map_err(Error::Bluetooth)?;
        Ok(power_state_from(state))
    }

    async fn power_state_changes(&self) -> Result<BoxStream<'static, PowerState>> {
        let events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        Ok(events
            .filter_map(|event| async move {
                match event {
                    CentralEvent::StateUpdate(state) => Some(power_state_from(state)),
                    _ => None,
                }
            })
            .boxed())
    }

    async fn start_scan(&self, services: &[Uuid]) -> Result<ScanStream> {
        // Subscribe before starting so the first advertisements are not missed.
        let events = self.adapter.events().await.map_err(Error::Bluetooth)?;

        self.adapter
            .start_scan(ScanFilter {
                services: services.to_vec(),
            })
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Started BLE scan for {} services", services.len());

        let adapter = self.adapter.clone();
        let filter: Arc<[Uuid]> = services.into();

        Ok(events
            .filter_map(move |event| {
                let adapter = adapter.clone();
                let filter = filter.clone();
                async move {
                    let id = match event {
                        CentralEvent::DeviceDiscovered(id)
                        | CentralEvent::DeviceUpdated(id)
                        | CentralEvent::ServicesAdvertisement { id, .. } => id,
                        _ => return None,
                    };

                    match BtleplugAdapter::record_for(&adapter, &id, &filter).await {
                        Ok(Some(record)) => Some(Ok(record)),
                        Ok(None) => None,
                        Err(e) => Some(Err(e)),
                    }
                }
            })
            .boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.adapter.stop_scan().await.map_err(Error::Bluetooth)
    }

    async fn device(&self, identifier: &str) -> Result<Arc<dyn RadioDevice>> {
        let peripherals = self.adapter.peripherals().await.map_err(Error::Bluetooth)?;

        let peripheral = peripherals
            .into_iter()
            .find(|p| p.id().to_string() == identifier)
            .ok_or_else(|| Error::DeviceNotFound {
                identifier: identifier.to_string(),
            })?;

        Ok(Arc::new(BtleplugDevice {
            adapter: self.adapter.clone(),
            peripheral,
        }))
    }
}

/// A btleplug peripheral exposed as a [`RadioDevice`].
#[derive(Clone)]
pub struct BtleplugDevice {
    adapter: Adapter,
    peripheral: Peripheral,
}

impl BtleplugDevice {
    /// Get the underlying peripheral.
    pub fn peripheral(&self) -> &Peripheral {
        &self.peripheral
    }
}

#[async_trait]
impl RadioDevice for BtleplugDevice {
    fn identifier(&self) -> String {
        self.peripheral.id().to_string()
    }

    async fn connect(&self) -> Result<()> {
        self.peripheral.connect().await.map_err(Error::Bluetooth)
    }

    async fn cancel_connection(&self) -> Result<()> {
        self.peripheral.disconnect().await.map_err(Error::Bluetooth)
    }

    async fn is_connected(&self) -> Result<bool> {
        self.peripheral.is_connected().await.map_err(Error::Bluetooth)
    }

    async fn discover_all_services_and_characteristics(&self) -> Result<()> {
        self.peripheral
            .discover_services()
            .await
            .map_err(Error::Bluetooth)
    }

    async fn services(&self) -> Result<Vec<Uuid>> {
        Ok(service_uuids(self.peripheral.services().iter()))
    }

    async fn characteristics_for_service(&self, service: Uuid) -> Result<Vec<Uuid>> {
        let services = self.peripheral.services();
        let found = services
            .iter()
            .find(|s| s.uuid == service)
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: service.to_string(),
            })?;

        Ok(found.characteristics.iter().map(|c| c.uuid).collect())
    }

    async fn monitor_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream> {
        let target = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or_else(|| Error::CharacteristicNotFound {
                uuid: characteristic.to_string(),
            })?;

        // Open the stream first so the first notification after subscribing lands in it.
        let notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?;

        self.peripheral
            .subscribe(&target)
            .await
            .map_err(Error::Bluetooth)?;

        debug!("Subscribed to notifications from {}", characteristic);

        Ok(notifications
            .filter_map(move |notification| async move {
                if notification.uuid != characteristic {
                    return None;
                }
                if notification.value.is_empty() {
                    Some(Ok(None))
                } else {
                    Some(Ok(Some(Bytes::from(notification.value))))
                }
            })
            .boxed())
    }

    async fn disconnections(&self) -> Result<BoxStream<'static, ()>> {
        let events = self.adapter.events().await.map_err(Error::Bluetooth)?;
        let id = self.peripheral.id();

        Ok(events
            .filter_map(move |event| {
                let id = id.clone();
                async move {
                    match event {
                        CentralEvent::DeviceDisconnected(disconnected) if disconnected == id => {
                            Some(())
                        }
                        _ => None,
                    }
                }
            })
            .boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_state_mapping() {
        assert_eq!(
            power_state_from(CentralState::PoweredOn),
            PowerState::PoweredOn
        );
        assert_eq!(
            power_state_from(CentralState::PoweredOff),
            PowerState::PoweredOff
        );
        assert_eq!(power_state_from(CentralState::Unknown), PowerState::Unknown);
    }

    #[test]
    fn test_handles_are_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<BtleplugAdapter>();
        assert_clone::<BtleplugDevice>();
    }
}
