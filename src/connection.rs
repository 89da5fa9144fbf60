//! Remote connection lifecycle
//!
//! `ConnectionManager` owns the single remote handle and the process-wide
//! `ConnectionState`. State only changes by feeding a `ConnectionEvent` through
//! [`ConnectionState::on`]; the watch channel holding the state is the one
//! writer, and readers take a cheap borrow without any I/O.

use std::{
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::{sync::watch, task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    CacheConfig, CacheError,
    remote::{RemoteConnector, RemoteStore},
};

/// State of the remote tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Reachable, but recent operations failed.
    Degraded,
}

/// Signals that drive [`ConnectionState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    ConnectStarted,
    /// Handshake or ping succeeded.
    Ready,
    TransportError(String),
    Closed,
}

impl ConnectionState {
    /// Transition table.
    pub fn on(self, event: &ConnectionEvent) -> ConnectionState {
        use ConnectionEvent::*;
        use ConnectionState::*;

        match (self, event) {
            (_, Closed) => Disconnected,
            (_, ConnectStarted) => Connecting,
            (_, Ready) => Connected,
            (Connected | Degraded, TransportError(_)) => Degraded,
            (Connecting | Disconnected, TransportError(_)) => Disconnected,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// Owns the remote handle, the connection state and the reconnect loop.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    config: CacheConfig,
    connector: Arc<dyn RemoteConnector>,
    state: watch::Sender<ConnectionState>,
    store: RwLock<Option<Arc<dyn RemoteStore>>>,
    attempts: AtomicU32,
    reconnecting: AtomicBool,
    shutdown: AtomicBool,
    health: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(config: CacheConfig, connector: Arc<dyn RemoteConnector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ConnectionInner {
                config,
                connector,
                state,
                store: RwLock::new(None),
                attempts: AtomicU32::new(0),
                reconnecting: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                health: Mutex::new(None),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Connect to the remote tier.
    ///
    /// Returns `false` right away when caching is disabled. A failed attempt
    /// starts the background reconnect loop with a full attempt budget and
    /// also returns `false`.
    pub async fn connect(&self) -> bool {
        if !self.inner.config.enabled {
            debug!("Remote cache disabled; skipping connect");
            return false;
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);
        self.inner.attempts.store(0, Ordering::SeqCst);
        self.ensure_health_check();

        if self.inner.try_connect().await {
            return true;
        }

        ConnectionInner::spawn_reconnect(&self.inner);
        false
    }

    /// Whether operations should go to the remote tier. Never performs I/O.
    pub fn is_available(&self) -> bool {
        *self.inner.state.borrow() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Drop the remote handle and stop background work.
    pub fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        if let Some(health) = self.inner.health.lock().take() {
            health.abort();
        }
        for task in self.inner.tasks.lock().drain(..) {
            task.abort();
        }
        self.inner.reconnecting.store(false, Ordering::SeqCst);
        self.inner.store.write().take();
        self.inner.apply(ConnectionEvent::Closed);
    }

    /// Current remote handle, if connected.
    pub(crate) fn store(&self) -> Option<Arc<dyn RemoteStore>> {
        if !self.is_available() {
            return None;
        }
        self.inner.store.read().clone()
    }

    /// Record a failed remote operation.
    pub(crate) fn report_error(&self, error: &CacheError) {
        if error.is_transport() {
            self.inner
                .apply(ConnectionEvent::TransportError(error.to_string()));
        }
    }

    /// Ping the remote handle once and update the state accordingly.
    ///
    /// A second consecutive failure drops the handle and restarts the
    /// reconnect loop with a fresh attempt budget.
    pub async fn health_check(&self) -> bool {
        let Some(store) = self.inner.store.read().clone() else {
            return false;
        };

        let result = match timeout(self.inner.config.op_timeout, store.ping()).await {
            Ok(r) => r,
            Err(_) => Err(CacheError::Timeout {
                op: "PING",
                after: self.inner.config.op_timeout,
            }),
        };

        match result {
            Ok(()) => {
                self.inner.apply(ConnectionEvent::Ready);
                true
            }
            Err(e) => {
                let was_degraded = self.state() == ConnectionState::Degraded;
                self.inner
                    .apply(ConnectionEvent::TransportError(e.to_string()));
                if was_degraded {
                    warn!("Remote cache still failing health checks ({}); reconnecting", e);
                    self.inner.store.write().take();
                    self.inner.apply(ConnectionEvent::Closed);
                    self.inner.attempts.store(0, Ordering::SeqCst);
                    ConnectionInner::spawn_reconnect(&self.inner);
                }
                false
            }
        }
    }

    /// Start the periodic health check unless it is already running.
    fn ensure_health_check(&self) {
        let mut slot = self.inner.health.lock();
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let weak: Weak<ConnectionInner> = Arc::downgrade(&self.inner);
        let interval = self.inner.config.health_check_interval;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                ConnectionManager { inner }.health_check().await;
            }
        }));
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }
}

impl ConnectionInner {
    fn apply(&self, event: ConnectionEvent) {
        let mut transition = None;
        self.state.send_if_modified(|state| {
            let next = state.on(&event);
            if next == *state {
                return false;
            }
            transition = Some((*state, next));
            *state = next;
            true
        });

        match transition {
            Some((from, to @ ConnectionState::Connected)) => {
                info!(%from, %to, ?event, "Remote cache connection state changed")
            }
            Some((from, to @ ConnectionState::Connecting)) => {
                debug!(%from, %to, ?event, "Remote cache connection state changed")
            }
            Some((from, to)) => {
                warn!(%from, %to, ?event, "Remote cache connection state changed")
            }
            None => {}
        }
    }

    async fn try_connect(&self) -> bool {
        self.apply(ConnectionEvent::ConnectStarted);

        let connect_timeout = self.config.connect_timeout;
        let result = match timeout(connect_timeout, self.handshake()).await {
            Ok(r) => r,
            Err(_) => Err(CacheError::Timeout {
                op: "connect",
                after: connect_timeout,
            }),
        };

        match result {
            Ok(store) => {
                *self.store.write() = Some(store);
                self.attempts.store(0, Ordering::SeqCst);
                self.apply(ConnectionEvent::Ready);
                info!(
                    "Connected to remote cache at {}:{}",
                    self.config.host, self.config.port
                );
                true
            }
            Err(e) => {
                warn!(
                    "Remote cache connect to {}:{} failed: {}",
                    self.config.host, self.config.port, e
                );
                self.apply(ConnectionEvent::TransportError(e.to_string()));
                false
            }
        }
    }

    async fn handshake(&self) -> Result<Arc<dyn RemoteStore>, CacheError> {
        let store = self.connector.connect().await?;
        store.ping().await?;
        Ok(store)
    }

    /// Retry with delay `min(attempt * 50ms, 2000ms)` until connected or the
    /// attempt budget is spent. Only one loop runs at a time.
    fn spawn_reconnect(this: &Arc<Self>) {
        if this.reconnecting.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = Arc::clone(this);
        let handle = tokio::spawn(async move {
            let max_attempts = inner.config.max_reconnect_attempts;
            loop {
                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let attempt = inner.attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt > max_attempts {
                    if inner.resume_after_budget_spent() {
                        continue;
                    }
                    warn!(
                        "Giving up on remote cache after {} reconnect attempts; serving from memory",
                        max_attempts
                    );
                    return;
                }

                let delay = CacheConfig::reconnect_delay(attempt);
                debug!("Remote cache reconnect attempt {} in {:?}", attempt, delay);
                tokio::time::sleep(delay).await;

                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                if inner.try_connect().await {
                    break;
                }
            }
            inner.reconnecting.store(false, Ordering::SeqCst);
        });

        let mut tasks = this.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);
    }

    /// Release the reconnect slot once the budget is spent.
    ///
    /// A `spawn_reconnect` that lost the race for the slot while this loop
    /// was exiting has already reset the budget; in that case the slot is
    /// reclaimed and `true` tells the loop to keep going.
    fn resume_after_budget_spent(&self) -> bool {
        self.reconnecting.store(false, Ordering::SeqCst);

        let budget_left =
            self.attempts.load(Ordering::SeqCst) < self.config.max_reconnect_attempts;
        let wanted = budget_left
            && !self.shutdown.load(Ordering::SeqCst)
            && *self.state.borrow() != ConnectionState::Connected;

        wanted
            && self
                .reconnecting
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}
