//! Connectivity monitor and reachability polling.
//!
//! The monitor keeps one boolean and notifies listeners only on real
//! transitions. Listeners run synchronously on the thread that reported the
//! change; a failing or panicking listener is logged and skipped.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Handle returned by [`ConnectivityMonitor::subscribe`].
pub type ListenerToken = u64;

/// Listener receiving the new online state.
pub type ConnectivityListener = Arc<dyn Fn(bool) -> Result<(), String> + Send + Sync>;

struct MonitorState {
    online: bool,
    listeners: BTreeMap<ListenerToken, ConnectivityListener>,
    next_token: ListenerToken,
}

/// Fans out online/offline transitions to subscribers.
pub struct ConnectivityMonitor {
    state: Mutex<MonitorState>,
    /// Serializes deliveries so listeners observe transitions in order.
    delivery: Mutex<()>,
}

impl ConnectivityMonitor {
    pub fn new(initially_online: bool) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                online: initially_online,
                listeners: BTreeMap::new(),
                next_token: 1,
            }),
            delivery: Mutex::new(()),
        }
    }

    pub fn is_online(&self) -> bool {
        self.state.lock().expect("lock poisoned").online
    }

    /// Register a listener. It is called once right away with the current state.
    pub fn subscribe(&self, listener: ConnectivityListener) -> ListenerToken {
        let _delivery = self.delivery.lock().expect("lock poisoned");
        let (token, online) = {
            let mut state = self.state.lock().expect("lock poisoned");
            let token = state.next_token;
            state.next_token += 1;
            state.listeners.insert(token, listener.clone());
            (token, state.online)
        };
        deliver(token, &listener, online);
        token
    }

    /// Returns false when the token was unknown.
    pub fn unsubscribe(&self, token: ListenerToken) -> bool {
        self.state
            .lock()
            .expect("lock poisoned")
            .listeners
            .remove(&token)
            .is_some()
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().expect("lock poisoned").listeners.len()
    }

    /// Record the current reachability. Listeners are notified before this
    /// returns, and only if the state actually changed. Returns whether it did.
    ///
    /// Listeners must not call `set_online` themselves.
    pub fn set_online(&self, online: bool) -> bool {
        let _delivery = self.delivery.lock().expect("lock poisoned");
        let listeners: Vec<(ListenerToken, ConnectivityListener)> = {
            let mut state = self.state.lock().expect("lock poisoned");
            if state.online == online {
                return false;
            }
            state.online = online;
            state
                .listeners
                .iter()
                .map(|(token, l)| (*token, l.clone()))
                .collect()
        };

        info!(online, listeners = listeners.len(), "Connectivity changed");
        for (token, listener) in &listeners {
            deliver(*token, listener, online);
        }
        true
    }
}

fn deliver(token: ListenerToken, listener: &ConnectivityListener, online: bool) {
    match catch_unwind(AssertUnwindSafe(|| listener(online))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(token, online, error = %e, "Connectivity listener failed"),
        Err(_) => warn!(token, online, "Connectivity listener panicked"),
    }
}

/// Platform reachability, reduced to one question.
#[async_trait]
pub trait ReachabilitySource: Send + Sync {
    async fn currently_reachable(&self) -> bool;
}

/// Reachability by opening a TCP connection to `host:port`.
pub struct TcpProbe {
    target: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            target: target.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilitySource for TcpProbe {
    async fn currently_reachable(&self) -> bool {
        match timeout(self.timeout, TcpStream::connect(&self.target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(probe = %self.target, error = %e, "Probe connect failed");
                false
            }
            Err(_) => {
                debug!(probe = %self.target, "Probe timed out");
                false
            }
        }
    }
}

/// Reachability flipped by hand (tests, simulator).
#[derive(Default)]
pub struct ManualReachability {
    reachable: AtomicBool,
}

impl ManualReachability {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    pub fn set(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReachabilitySource for ManualReachability {
    async fn currently_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

/// Poll `source` every `period` and feed the result into `monitor`.
pub fn spawn_poller(
    monitor: Arc<ConnectivityMonitor>,
    source: Arc<dyn ReachabilitySource>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reachable = source.currently_reachable().await;
            let monitor = monitor.clone();
            // Listeners run synchronously; keep them off the async workers.
            if let Err(e) = tokio::task::spawn_blocking(move || monitor.set_online(reachable)).await {
                warn!(reachable, error = %e, "Connectivity update task failed");
            }
        }
    })
}
