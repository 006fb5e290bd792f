//! BLE connection management.
//!
//! Keeps a single device connected: an immediate connect attempt on
//! start, then a periodic health check that reconnects whenever the device
//! reports that it is not connected. Every successful (re)connection runs
//! the registered reconnect callbacks in registration order.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::ble::adapter::RadioDevice;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};

/// Connection state for a managed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ConnectionState {
    /// Not managing the connection.
    #[default]
    Idle,
    /// Currently attempting to connect.
    Connecting,
    /// Connected to the device.
    Connected,
    /// Connection attempt failed or the link dropped; the next health
    /// check will retry.
    AwaitingReconnect,
}

impl ConnectionState {
    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if in a transitional state.
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::AwaitingReconnect => write!(f, "AwaitingReconnect"),
        }
    }
}

/// Event for connection state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// The identifier of the device.
    pub identifier: String,
    /// The new connection state.
    pub state: ConnectionState,
}

/// Action re-run after every successful (re)connection.
pub type ReconnectCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Observer notified with the device identifier on connect or disconnect.
pub type DeviceObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// State shared between the manager and its health check task.
struct Shared {
    device: Arc<dyn RadioDevice>,
    identifier: String,
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    callbacks: RwLock<Vec<ReconnectCallback>>,
    on_connected: RwLock<Option<DeviceObserver>>,
    on_disconnected: RwLock<Option<DeviceObserver>>,
    event_tx: broadcast::Sender<ConnectionEvent>,
    /// Id of the running `start()` session, 0 while stopped.
    session: AtomicU64,
    sessions: AtomicU64,
}

impl Shared {
    fn begin_session(&self) -> u64 {
        let session = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.session.store(session, Ordering::SeqCst);
        session
    }

    fn end_session(&self) {
        self.session.store(0, Ordering::SeqCst);
    }

    fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    fn is_current(&self, session: u64) -> bool {
        self.session.load(Ordering::SeqCst) == session
    }

    /// Connect, notify the connected observer, then run every reconnect
    /// callback in order.
    async fn connect_and_run_callbacks(&self, session: u64) -> Result<()> {
        self.set_session_state(session, ConnectionState::Connecting);

        if let Err(e) = self.device.connect().await {
            self.set_session_state(session, ConnectionState::AwaitingReconnect);
            return Err(Error::ConnectionFailed {
                reason: e.to_string(),
            });
        }

        info!("Connected to {}", self.identifier);
        if !self.set_session_state(session, ConnectionState::Connected) {
            debug!("Monitoring of {} stopped while connecting", self.identifier);
            return Ok(());
        }

        let observer = self.on_connected.read().clone();
        if let Some(observer) = observer {
            observer(&self.identifier);
        }

        self.run_reconnect_callbacks().await;

        Ok(())
    }

    /// Run callbacks one at a time. A failing or panicking callback is
    /// logged and the rest still run.
    async fn run_reconnect_callbacks(&self) {
        let callbacks = self.callbacks.read().clone();

        for (index, callback) in callbacks.into_iter().enumerate() {
            let outcome = AssertUnwindSafe(async move { callback().await })
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => trace!("Reconnect callback {} completed", index),
                Ok(Err(e)) => warn!(
                    "Error while executing reconnect callback {} for {}: {}",
                    index, self.identifier, e
                ),
                Err(_) => error!(
                    "Reconnect callback {} for {} panicked",
                    index, self.identifier
                ),
            }
        }
    }

    /// Merge health check ticks and disconnect notifications until shutdown.
    async fn run_health_checks(
        self: Arc<Self>,
        session: u64,
        mut shutdown: oneshot::Receiver<()>,
        mut disconnects: BoxStream<'static, ()>,
    ) {
        let period = self.config.check_interval.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watching_disconnects = true;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.check_connection(session).await,
                event = disconnects.next(), if watching_disconnects => match event {
                    Some(()) => self.handle_disconnected(session),
                    None => {
                        debug!("Disconnect stream for {} ended", self.identifier);
                        watching_disconnects = false;
                    }
                },
            }
        }

        debug!("Health check loop for {} ended", self.identifier);
    }

    async fn check_connection(&self, session: u64) {
        match self.device.is_connected().await {
            // A disconnect notice handled after a reconnect may have marked
            // a live link as down.
            Ok(true) if self.state() != ConnectionState::Connected => {
                debug!("{} is connected, restoring state", self.identifier);
                self.set_session_state(session, ConnectionState::Connected);
            }
            Ok(true) => trace!("{} still connected", self.identifier),
            Ok(false) => {
                info!(
                    "Device {} is not connected, attempting to reconnect",
                    self.identifier
                );
                if let Err(e) = self.connect_and_run_callbacks(session).await {
                    warn!("Reconnection to {} failed: {}", self.identifier, e);
                }
            }
            Err(e) => warn!(
                "Error while checking connection to {}: {}",
                self.identifier, e
            ),
        }
    }

    fn handle_disconnected(&self, session: u64) {
        info!("Device {} disconnected", self.identifier);
        if !self.set_session_state(session, ConnectionState::AwaitingReconnect) {
            return;
        }

        let observer = self.on_disconnected.read().clone();
        if let Some(observer) = observer {
            observer(&self.identifier);
        }
    }

    /// Update the state on behalf of `session`. Returns `false`, leaving
    /// the state alone, once that session has been stopped.
    fn set_session_state(&self, session: u64, new_state: ConnectionState) -> bool {
        let mut state = self.state.write();
        if !self.is_current(session) {
            trace!(
                "Ignoring {} for {} from a stopped session",
                new_state,
                self.identifier
            );
            return false;
        }
        self.apply_state(&mut *state, new_state);
        true
    }

    /// Update the connection state and emit an event.
    fn set_state(&self, new_state: ConnectionState) {
        let mut state = self.state.write();
        self.apply_state(&mut *state, new_state);
    }

    fn apply_state(&self, state: &mut ConnectionState, new_state: ConnectionState) {
        let old_state = std::mem::replace(state, new_state);

        if old_state != new_state {
            debug!(
                "Connection state of {} changed: {} -> {}",
                self.identifier, old_state, new_state
            );

            let _ = self.event_tx.send(ConnectionEvent {
                identifier: self.identifier.clone(),
                state: new_state,
            });
        }
    }
}

/// A running health check task.
struct HealthMonitor {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Maintains the connection to one device.
pub struct ConnectionManager {
    shared: Arc<Shared>,
    /// The armed health check, if any. At most one exists at a time.
    monitor: Mutex<Option<HealthMonitor>>,
    /// Set from `start()` until `stop()`, including the initial connect.
    monitoring: AtomicBool,
}

impl ConnectionManager {
    /// Create a new connection manager for a device.
    pub fn new(device: Arc<dyn RadioDevice>, config: ConnectionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_buffer.max(1));
        let identifier = device.identifier();

        Self {
            shared: Arc::new(Shared {
                device,
                identifier,
                config,
                state: RwLock::new(ConnectionState::Idle),
                callbacks: RwLock::new(Vec::new()),
                on_connected: RwLock::new(None),
                on_disconnected: RwLock::new(None),
                event_tx,
                session: AtomicU64::new(0),
                sessions: AtomicU64::new(0),
            }),
            monitor: Mutex::new(None),
            monitoring: AtomicBool::new(false),
        }
    }

    /// Get the identifier of the managed device.
    pub fn identifier(&self) -> &str {
        &self.shared.identifier
    }

    /// Get the managed device.
    pub fn device(&self) -> &Arc<dyn RadioDevice> {
        &self.shared.device
    }

    /// Get the configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.shared.config
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Check if `start()` is in effect.
    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    /// Check if the health check timer is armed.
    pub fn has_active_timer(&self) -> bool {
        self.monitor.lock().is_some()
    }

    /// Subscribe to connection events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Set the observer invoked after every successful (re)connection.
    pub fn on_device_connected<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.shared.on_connected.write() = Some(Arc::new(observer));
    }

    /// Set the observer invoked when the device reports a disconnect.
    pub fn on_device_disconnected<F>(&self, observer: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.shared.on_disconnected.write() = Some(Arc::new(observer));
    }

    /// Register an action to run after every successful (re)connection.
    ///
    /// Callbacks run in registration order, one at a time. May be called
    /// before or after [`start`](Self::start); callbacks added later run
    /// from the next connection on.
    pub fn add_reconnect_callback<F, Fut>(&self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let callback: ReconnectCallback = Arc::new(move || callback().boxed());
        self.shared.callbacks.write().push(callback);
    }

    /// Number of registered reconnect callbacks.
    pub fn reconnect_callback_count(&self) -> usize {
        self.shared.callbacks.read().len()
    }

    /// Connect and start monitoring the connection.
    ///
    /// Does nothing if already monitoring. The initial connect failing is
    /// logged, not returned; the health check is armed either way and
    /// keeps retrying. Disconnects reported while the initial connect and
    /// its callbacks run are handled once the health check starts.
    pub async fn start(&self) {
        if self.monitoring.swap(true, Ordering::SeqCst) {
            debug!("Already monitoring connection to {}", self.identifier());
            return;
        }

        let session = self.shared.begin_session();

        let disconnects = match self.shared.device.disconnections().await {
            Ok(disconnects) => disconnects,
            Err(e) => {
                warn!(
                    "Cannot watch {} for disconnects, relying on health checks: {}",
                    self.identifier(),
                    e
                );
                stream::pending().boxed()
            }
        };

        info!("Attempting initial connection to {}", self.identifier());

        if let Err(e) = self.shared.connect_and_run_callbacks(session).await {
            warn!(
                "Error during initial connection to {}: {}",
                self.identifier(),
                e
            );
        }

        let mut monitor = self.monitor.lock();

        if !self.monitoring.load(Ordering::SeqCst) {
            debug!(
                "Monitoring of {} stopped during initial connection",
                self.identifier()
            );
            self.shared.set_state(ConnectionState::Idle);
            return;
        }

        if monitor.is_some() || !self.shared.is_current(session) {
            // A stop/start pair raced with this call; the newer start arms
            // the timer.
            return;
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(
            self.shared
                .clone()
                .run_health_checks(session, shutdown_rx, disconnects),
        );

        *monitor = Some(HealthMonitor { shutdown, handle });

        debug!(
            "Health check armed for {} every {:?}",
            self.identifier(),
            self.shared.config.check_interval
        );
    }

    /// Stop monitoring. Safe to call any number of times.
    ///
    /// No health check tick starts after this returns. A tick already in
    /// progress, possibly on another worker thread, is cancelled at its
    /// next await point; until then it may still call the device and run
    /// callbacks, but its state changes and observer calls are dropped, so
    /// the state stays `Idle`.
    pub fn stop(&self) {
        let monitor = {
            let mut guard = self.monitor.lock();
            self.monitoring.store(false, Ordering::SeqCst);
            self.shared.end_session();
            guard.take()
        };

        if let Some(monitor) = monitor {
            let _ = monitor.shutdown.send(());
            monitor.handle.abort();
            info!("Stopped monitoring connection to {}", self.identifier());
        }

        self.shared.set_state(ConnectionState::Idle);
    }

    /// Stop monitoring and drop the radio connection.
    pub async fn disconnect(&self) -> Result<()> {
        self.stop();

        match self.shared.device.cancel_connection().await {
            Ok(()) => {
                info!("Disconnected from {}", self.identifier());
                Ok(())
            }
            Err(e) => {
                error!("Failed to disconnect from {}: {}", self.identifier(), e);
                Err(e)
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.handle.abort();
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("identifier", &self.shared.identifier)
            .field("state", &self.state())
            .field("monitoring", &self.is_monitoring())
            .finish()
    }
}
