//! Application-facing entry point.
//!
//! A [`DeviceManager`] is created once at application start and owns the
//! radio adapter. It scans for devices, inspects their services, and hands
//! out [`MonitorHandle`]s that keep a device connected and its
//! characteristics subscribed.

use futures::stream::StreamExt;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::adapter::{PowerState, RadioAdapter};
use crate::ble::btleplug_adapter::BtleplugAdapter;
use crate::ble::characteristics::{CharacteristicMonitor, MonitorConfiguration};
use crate::ble::connection::{
    ConnectionEvent, ConnectionManager, ConnectionState, DeviceObserver,
};
use crate::ble::scanner::DeviceScanner;
use crate::config::Config;
use crate::data::DeviceRecord;
use crate::error::{Error, Result};
use crate::subscription::Subscription;

/// Subscription slot refreshed on every reconnection.
type SubscriptionSlot = Arc<Mutex<Option<Subscription>>>;

/// Central manager for discovering and monitoring devices.
pub struct DeviceManager {
    /// Radio used for every operation.
    adapter: Arc<dyn RadioAdapter>,
    /// Scanner sharing the same radio.
    scanner: DeviceScanner,
    /// Scan and connection settings.
    config: Config,
}

impl DeviceManager {
    /// Create a manager on the first Bluetooth adapter with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        Self::with_config(Config::default()).await
    }

    /// Create a manager on the first Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn with_config(config: Config) -> Result<Self> {
        let adapter = BtleplugAdapter::new().await?;
        Ok(Self::with_adapter(Arc::new(adapter), config))
    }

    /// Create a manager on an existing radio.
    pub fn with_adapter(adapter: Arc<dyn RadioAdapter>, config: Config) -> Self {
        let scanner = DeviceScanner::new(adapter.clone(), config.scan.clone());

        Self {
            adapter,
            scanner,
            config,
        }
    }

    /// Get the radio adapter.
    pub fn adapter(&self) -> &Arc<dyn RadioAdapter> {
        &self.adapter
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the scanner.
    pub fn scanner(&self) -> &DeviceScanner {
        &self.scanner
    }

    /// Current radio power state.
    pub async fn power_state(&self) -> Result<PowerState> {
        self.adapter.power_state().await
    }

    /// Wait until the radio reports [`PowerState::PoweredOn`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Timeout`] if the radio is not powered on within
    /// `timeout`, or [`Error::BluetoothUnavailable`] if the adapter stops
    /// reporting state changes first.
    pub async fn wait_for_powered_on(&self, timeout: Duration) -> Result<()> {
        // Subscribe before reading the current state so a change in between
        // is not missed.
        let mut changes = self.adapter.power_state_changes().await?;

        let current = self.adapter.power_state().await?;
        if current.is_ready() {
            return Ok(());
        }

        info!("Waiting for Bluetooth to power on (currently {})", current);

        let wait = async {
            while let Some(state) = changes.next().await {
                debug!("Radio power state changed to {}", state);
                if state.is_ready() {
                    return Ok(());
                }
            }
            Err(Error::BluetoothUnavailable)
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| Error::Timeout)?
    }

    /// Register a callback for radio power state changes.
    ///
    /// The callback runs until the returned [`Subscription`] is cancelled
    /// or dropped.
    pub async fn on_power_state_changed<F>(&self, callback: F) -> Result<Subscription>
    where
        F: Fn(PowerState) + Send + Sync + 'static,
    {
        let mut changes = self.adapter.power_state_changes().await?;

        let handle = tokio::spawn(async move {
            while let Some(state) = changes.next().await {
                callback(state);
            }
            debug!("Power state stream ended");
        });

        Ok(Subscription::for_task(handle))
    }

    /// Scan for `duration` and return the deduplicated devices found.
    pub async fn scan(&self, duration: Duration) -> Vec<DeviceRecord> {
        self.scanner.scan(duration).await
    }

    /// Scan for the configured default window.
    pub async fn scan_default(&self) -> Vec<DeviceRecord> {
        self.scanner.scan_default().await
    }

    /// Connect to a device, list its services, and disconnect again.
    pub async fn inspect_services(&self, device: &DeviceRecord) -> Result<Vec<Uuid>> {
        let radio = self.adapter.device(&device.identifier).await?;

        radio.connect().await.map_err(|e| Error::ConnectionFailed {
            reason: e.to_string(),
        })?;

        let services = match radio.discover_all_services_and_characteristics().await {
            Ok(()) => radio.services().await,
            Err(e) => Err(e),
        };

        if let Err(e) = radio.cancel_connection().await {
            warn!("Error disconnecting from {}: {}", device, e);
        }

        let services = services?;
        debug!("{} exposes {} service(s)", device, services.len());
        Ok(services)
    }

    /// Connect to a device and keep it connected and monitored.
    ///
    /// Every configuration is (re)subscribed after each successful
    /// connection, in order. The observers are called with the device
    /// identifier when it connects and when it reports a disconnect.
    ///
    /// If the very first connection succeeds but a configured service or
    /// characteristic does not exist, the connection is torn down and that
    /// error returned. Failures on later reconnections are only logged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] if the adapter does not know the
    /// device, or a lookup error as described above.
    pub async fn connect_and_monitor(
        &self,
        device: &DeviceRecord,
        monitors: Vec<MonitorConfiguration>,
        on_connected: Option<DeviceObserver>,
        on_disconnected: Option<DeviceObserver>,
    ) -> Result<MonitorHandle> {
        let radio = self.adapter.device(&device.identifier).await?;
        let manager = Arc::new(ConnectionManager::new(
            radio.clone(),
            self.config.connection.clone(),
        ));

        if let Some(observer) = on_connected {
            manager.on_device_connected(move |id| observer(id));
        }
        if let Some(observer) = on_disconnected {
            manager.on_device_disconnected(move |id| observer(id));
        }

        let monitor = CharacteristicMonitor::new(radio);
        let initial_failure: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
        let initial_attempt = Arc::new(AtomicBool::new(true));
        let mut subscriptions = Vec::with_capacity(monitors.len());

        for config in monitors {
            let slot: SubscriptionSlot = Arc::new(Mutex::new(None));
            subscriptions.push(slot.clone());

            let monitor = monitor.clone();
            let initial_failure = initial_failure.clone();
            let initial_attempt = initial_attempt.clone();

            manager.add_reconnect_callback(move || {
                let monitor = monitor.clone();
                let config = config.clone();
                let slot = slot.clone();
                let initial_failure = initial_failure.clone();
                let initial_attempt = initial_attempt.clone();

                async move {
                    // The previous link's subscription is dead; release it first.
                    let previous = slot.lock().take();
                    drop(previous);

                    match monitor.subscribe(&config).await {
                        Ok(subscription) => {
                            *slot.lock() = subscription;
                            Ok(())
                        }
                        Err(e) => {
                            let reason = format!(
                                "{}/{}: {}",
                                config.service(),
                                config.characteristic(),
                                e
                            );
                            if e.is_not_found() && initial_attempt.load(Ordering::SeqCst) {
                                initial_failure.lock().get_or_insert(e);
                            }
                            Err(Error::CallbackFailed { reason })
                        }
                    }
                }
            });
        }

        manager.start().await;
        initial_attempt.store(false, Ordering::SeqCst);

        let failure = initial_failure.lock().take();
        if let Some(e) = failure {
            warn!("Cannot monitor {}: {}", device, e);
            if let Err(disconnect_err) = manager.disconnect().await {
                warn!("Error disconnecting from {}: {}", device, disconnect_err);
            }
            return Err(e);
        }

        info!("Monitoring {}", device);

        Ok(MonitorHandle {
            manager,
            subscriptions,
        })
    }
}

/// Handle to a monitored device.
///
/// Dropping the handle stops monitoring and cancels the notification
/// subscriptions; the radio link itself is only torn down by
/// [`disconnect`](Self::disconnect).
pub struct MonitorHandle {
    manager: Arc<ConnectionManager>,
    subscriptions: Vec<SubscriptionSlot>,
}

impl MonitorHandle {
    /// Get the identifier of the monitored device.
    pub fn identifier(&self) -> &str {
        self.manager.identifier()
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// Check if the device is connected.
    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    /// Check if the connection is still being monitored.
    pub fn is_monitoring(&self) -> bool {
        self.manager.is_monitoring()
    }

    /// Subscribe to connection state changes.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.manager.subscribe()
    }

    /// Number of configurations with a live notification subscription.
    pub fn active_subscriptions(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|slot| slot.lock().is_some())
            .count()
    }

    /// Get the underlying connection manager.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Stop monitoring and cancel all subscriptions. Idempotent.
    pub fn stop(&self) {
        self.manager.stop();
        self.release_subscriptions();
    }

    /// Stop monitoring and disconnect from the device.
    pub async fn disconnect(&self) -> Result<()> {
        self.release_subscriptions();
        self.manager.disconnect().await
    }

    fn release_subscriptions(&self) {
        for slot in &self.subscriptions {
            let subscription = slot.lock().take();
            drop(subscription);
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("manager", &self.manager)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::adapter::{MockRadioAdapter, MockRadioDevice, RadioDevice};
    use crate::ble::uuids::{
        BATTERY_SERVICE_UUID, HEART_RATE_MEASUREMENT_UUID, HEART_RATE_SERVICE_UUID,
    };
    use bytes::Bytes;
    use futures::stream;
    use std::sync::atomic::AtomicUsize;

    fn adapter_with_device(device: MockRadioDevice) -> MockRadioAdapter {
        let device: Arc<dyn RadioDevice> = Arc::new(device);
        let mut adapter = MockRadioAdapter::new();
        adapter
            .expect_device()
            .returning(move |_| Ok(device.clone()));
        adapter
    }

    fn heart_rate_device() -> MockRadioDevice {
        let mut device = MockRadioDevice::new();
        device.expect_identifier().return_const("hr-1".to_string());
        device.expect_connect().returning(|| Ok(()));
        device.expect_is_connected().returning(|| Ok(true));
        device
            .expect_discover_all_services_and_characteristics()
            .returning(|| Ok(()));
        device
            .expect_services()
            .returning(|| Ok(vec![HEART_RATE_SERVICE_UUID]));
        device
            .expect_characteristics_for_service()
            .returning(|_| Ok(vec![HEART_RATE_MEASUREMENT_UUID]));
        device
            .expect_disconnections()
            .returning(|| Ok(stream::pending().boxed()));
        device
    }

    fn manager(adapter: MockRadioAdapter) -> DeviceManager {
        DeviceManager::with_adapter(Arc::new(adapter), Config::default())
    }

    #[tokio::test]
    async fn test_wait_for_powered_on_when_already_on() {
        let mut adapter = MockRadioAdapter::new();
        adapter
            .expect_power_state_changes()
            .returning(|| Ok(stream::pending().boxed()));
        adapter
            .expect_power_state()
            .returning(|| Ok(PowerState::PoweredOn));

        manager(adapter)
            .wait_for_powered_on(Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_powered_on_follows_changes() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_power_state_changes().returning(|| {
            Ok(stream::iter(vec![PowerState::Resetting, PowerState::PoweredOn])
                .chain(stream::pending())
                .boxed())
        });
        adapter
            .expect_power_state()
            .returning(|| Ok(PowerState::PoweredOff));

        manager(adapter)
            .wait_for_powered_on(Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_powered_on_times_out() {
        let mut adapter = MockRadioAdapter::new();
        adapter
            .expect_power_state_changes()
            .returning(|| Ok(stream::pending().boxed()));
        adapter
            .expect_power_state()
            .returning(|| Ok(PowerState::PoweredOff));

        let err = manager(adapter)
            .wait_for_powered_on(Duration::from_secs(3))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn test_on_power_state_changed_delivers_states() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_power_state_changes().returning(|| {
            Ok(stream::iter(vec![PowerState::PoweredOff, PowerState::PoweredOn])
                .chain(stream::pending())
                .boxed())
        });

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let _subscription = manager(adapter)
            .on_power_state_changed(move |state| {
                let _ = tx.send(state);
            })
            .await
            .unwrap();

        assert_eq!(rx.recv().await, Some(PowerState::PoweredOff));
        assert_eq!(rx.recv().await, Some(PowerState::PoweredOn));
    }

    #[tokio::test]
    async fn test_inspect_services_disconnects_afterwards() {
        let mut device = MockRadioDevice::new();
        device.expect_identifier().return_const("dev".to_string());
        device.expect_connect().times(1).returning(|| Ok(()));
        device
            .expect_discover_all_services_and_characteristics()
            .returning(|| Ok(()));
        device
            .expect_services()
            .returning(|| Ok(vec![HEART_RATE_SERVICE_UUID, BATTERY_SERVICE_UUID]));
        device.expect_cancel_connection().times(1).returning(|| Ok(()));

        let services = manager(adapter_with_device(device))
            .inspect_services(&DeviceRecord::new("dev"))
            .await
            .unwrap();

        assert_eq!(services, vec![HEART_RATE_SERVICE_UUID, BATTERY_SERVICE_UUID]);
    }

    #[tokio::test]
    async fn test_inspect_services_disconnects_on_failure() {
        let mut device = MockRadioDevice::new();
        device.expect_identifier().return_const("dev".to_string());
        device.expect_connect().returning(|| Ok(()));
        device
            .expect_discover_all_services_and_characteristics()
            .returning(|| Err(Error::Timeout));
        device.expect_services().times(0);
        device.expect_cancel_connection().times(1).returning(|| Ok(()));

        let result = manager(adapter_with_device(device))
            .inspect_services(&DeviceRecord::new("dev"))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let mut adapter = MockRadioAdapter::new();
        adapter.expect_device().returning(|id| {
            Err(Error::DeviceNotFound {
                identifier: id.to_string(),
            })
        });

        let result = manager(adapter)
            .connect_and_monitor(&DeviceRecord::new("gone"), Vec::new(), None, None)
            .await;
        assert!(matches!(result, Err(Error::DeviceNotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_monitor_delivers_data() {
        let mut device = heart_rate_device();
        device.expect_monitor_characteristic().returning(|_, _| {
            Ok(stream::iter(vec![Ok(Some(Bytes::from_static(&[0x00, 72])))])
                .chain(stream::pending())
                .boxed())
        });

        let connected = Arc::new(AtomicUsize::new(0));
        let counter = connected.clone();
        let on_connected: DeviceObserver = Arc::new(move |_: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (config, mut rx) = MonitorConfiguration::channel("180d", "2a37");
        let handle = manager(adapter_with_device(device))
            .connect_and_monitor(
                &DeviceRecord::new("hr-1"),
                vec![config],
                Some(on_connected),
                None,
            )
            .await
            .unwrap();

        assert_eq!(handle.state(), ConnectionState::Connected);
        assert_eq!(handle.active_subscriptions(), 1);
        assert_eq!(connected.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv().await.unwrap().unwrap(), Bytes::from_static(&[0x00, 72]));

        handle.stop();
        assert_eq!(handle.active_subscriptions(), 0);
        assert!(!handle.is_monitoring());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_monitor_unknown_service() {
        let mut device = heart_rate_device();
        device.expect_monitor_characteristic().times(0);
        device.expect_cancel_connection().times(1).returning(|| Ok(()));

        let config = MonitorConfiguration::new("1818", "2a63", |_| {});
        let result = manager(adapter_with_device(device))
            .connect_and_monitor(&DeviceRecord::new("hr-1"), vec![config], None, None)
            .await;

        assert!(matches!(result, Err(Error::ServiceNotFound { .. })));
    }
}
