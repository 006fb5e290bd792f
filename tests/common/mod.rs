//! Scriptable in-memory radio shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use heartlink_ble::ble::adapter::{NotificationStream, ScanStream};
use heartlink_ble::{DeviceRecord, Error, PowerState, RadioAdapter, RadioDevice, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Turn an unbounded receiver into a stream that ends when all senders drop.
fn receiver_stream<T: Send + 'static>(rx: mpsc::UnboundedReceiver<T>) -> BoxStream<'static, T> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
}

/// A peripheral whose link can be dropped and whose notifications are
/// pushed by the test.
pub struct FakeDevice {
    identifier: String,
    services: Vec<(Uuid, Vec<Uuid>)>,
    connected: AtomicBool,
    failing_connects: AtomicUsize,
    calls: Mutex<Vec<String>>,
    notification_txs: Mutex<Vec<mpsc::UnboundedSender<Result<Option<Bytes>>>>>,
    disconnect_txs: Mutex<Vec<mpsc::UnboundedSender<()>>>,
}

impl FakeDevice {
    pub fn new(identifier: &str) -> Self {
        Self {
            identifier: identifier.to_string(),
            services: Vec::new(),
            connected: AtomicBool::new(false),
            failing_connects: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            notification_txs: Mutex::new(Vec::new()),
            disconnect_txs: Mutex::new(Vec::new()),
        }
    }

    pub fn with_service(mut self, service: Uuid, characteristics: Vec<Uuid>) -> Self {
        self.services.push((service, characteristics));
        self
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Simulate the peripheral going out of range.
    pub fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.notification_txs.lock().clear();
        self.disconnect_txs
            .lock()
            .retain(|tx| tx.send(()).is_ok());
    }

    /// Push a notification to every open characteristic stream.
    pub fn notify(&self, payload: &[u8]) {
        let item = if payload.is_empty() {
            None
        } else {
            Some(Bytes::copy_from_slice(payload))
        };
        self.notification_txs
            .lock()
            .retain(|tx| tx.send(Ok(item.clone())).is_ok());
    }

    /// Push an error to every open characteristic stream.
    pub fn notify_error(&self, reason: &str) {
        self.notification_txs.lock().retain(|tx| {
            tx.send(Err(Error::InvalidData {
                context: reason.to_string(),
            }))
            .is_ok()
        });
    }

    pub fn is_linked(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == call).count()
    }

    fn record(&self, call: &str) {
        self.calls.lock().push(call.to_string());
    }
}

#[async_trait]
impl RadioDevice for FakeDevice {
    fn identifier(&self) -> String {
        self.identifier.clone()
    }

    async fn connect(&self) -> Result<()> {
        self.record("connect");
        let failing = self.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_connects.store(failing - 1, Ordering::SeqCst);
            return Err(Error::ConnectionFailed {
                reason: "peripheral out of range".to_string(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn cancel_connection(&self) -> Result<()> {
        self.record("cancel_connection");
        self.connected.store(false, Ordering::SeqCst);
        self.notification_txs.lock().clear();
        Ok(())
    }

    async fn is_connected(&self) -> Result<bool> {
        self.record("is_connected");
        Ok(self.is_linked())
    }

    async fn discover_all_services_and_characteristics(&self) -> Result<()> {
        self.record("discover");
        if self.is_linked() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn services(&self) -> Result<Vec<Uuid>> {
        Ok(self.services.iter().map(|(uuid, _)| *uuid).collect())
    }

    async fn characteristics_for_service(&self, service: Uuid) -> Result<Vec<Uuid>> {
        self.services
            .iter()
            .find(|(uuid, _)| *uuid == service)
            .map(|(_, characteristics)| characteristics.clone())
            .ok_or(Error::ServiceNotFound {
                uuid: service.to_string(),
            })
    }

    async fn monitor_characteristic(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<NotificationStream> {
        self.record("monitor");
        let (tx, rx) = mpsc::unbounded_channel();
        self.notification_txs.lock().push(tx);
        Ok(receiver_stream(rx))
    }

    async fn disconnections(&self) -> Result<BoxStream<'static, ()>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.disconnect_txs.lock().push(tx);
        Ok(receiver_stream(rx))
    }
}

/// One scripted discovery event, delivered `delay` after the previous one.
pub struct ScanStep {
    pub delay: Duration,
    pub event: Result<DeviceRecord>,
}

impl ScanStep {
    pub fn found(delay_ms: u64, record: DeviceRecord) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            event: Ok(record),
        }
    }

    pub fn failed(delay_ms: u64, reason: &str) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            event: Err(Error::ScanFailed {
                reason: reason.to_string(),
            }),
        }
    }
}

/// A radio with scripted scans and a fixed set of known devices.
#[derive(Default)]
pub struct FakeAdapter {
    power: Mutex<PowerState>,
    power_txs: Mutex<Vec<mpsc::UnboundedSender<PowerState>>>,
    scan_script: Mutex<VecDeque<Vec<ScanStep>>>,
    fail_start: AtomicBool,
    devices: Mutex<HashMap<String, Arc<FakeDevice>>>,
    scans_started: AtomicUsize,
    scans_stopped: AtomicUsize,
}

impl FakeAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, device: Arc<FakeDevice>) {
        self.devices.lock().insert(device.identifier(), device);
    }

    /// Script the events of the next scan.
    pub fn script_scan(&self, steps: Vec<ScanStep>) {
        self.scan_script.lock().push_back(steps);
    }

    pub fn fail_scan_start(&self) {
        self.fail_start.store(true, Ordering::SeqCst);
    }

    pub fn set_power(&self, state: PowerState) {
        *self.power.lock() = state;
        self.power_txs.lock().retain(|tx| tx.send(state).is_ok());
    }

    pub fn scans_started(&self) -> usize {
        self.scans_started.load(Ordering::SeqCst)
    }

    pub fn scans_stopped(&self) -> usize {
        self.scans_stopped.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RadioAdapter for FakeAdapter {
    async fn power_state(&self) -> Result<PowerState> {
        Ok(*self.power.lock())
    }

    async fn power_state_changes(&self) -> Result<BoxStream<'static, PowerState>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.power_txs.lock().push(tx);
        Ok(receiver_stream(rx))
    }

    async fn start_scan(&self, _services: &[Uuid]) -> Result<ScanStream> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Error::ScanFailed {
                reason: "radio powered off".to_string(),
            });
        }

        self.scans_started.fetch_add(1, Ordering::SeqCst);
        let steps = self.scan_script.lock().pop_front().unwrap_or_default();

        Ok(stream::iter(steps)
            .then(|step| async move {
                tokio::time::sleep(step.delay).await;
                step.event
            })
            .boxed())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scans_stopped.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn device(&self, identifier: &str) -> Result<Arc<dyn RadioDevice>> {
        let device = self.devices.lock().get(identifier).cloned();
        match device {
            Some(device) => Ok(device as Arc<dyn RadioDevice>),
            None => Err(Error::DeviceNotFound {
                identifier: identifier.to_string(),
            }),
        }
    }
}
