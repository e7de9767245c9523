//! Online/offline signal with edge-triggered "restored" notifications.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Current connectivity snapshot, as seen by the sync controller.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Shared online flag. Clones observe and drive the same state.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    state: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self {
            state: Arc::new(tx),
        }
    }

    /// Record the latest observation. Returns true on an offline→online edge.
    pub fn set_online(&self, online: bool) -> bool {
        let mut restored = false;
        self.state.send_if_modified(|current| {
            if *current == online {
                return false;
            }
            restored = online;
            *current = online;
            true
        });
        restored
    }

    pub fn restored(&self) -> RestoredListener {
        let rx = self.state.subscribe();
        let last = *rx.borrow();
        RestoredListener { rx, last }
    }
}

impl Connectivity for ConnectivitySignal {
    fn is_online(&self) -> bool {
        *self.state.borrow()
    }
}

/// Yields once per offline→online transition observed after subscribing.
pub struct RestoredListener {
    rx: watch::Receiver<bool>,
    last: bool,
}

impl RestoredListener {
    /// Waits for the next restore. `None` once every signal handle is gone.
    pub async fn recv(&mut self) -> Option<()> {
        loop {
            self.rx.changed().await.ok()?;
            let now = *self.rx.borrow_and_update();
            let was = std::mem::replace(&mut self.last, now);
            if !was && now {
                return Some(());
            }
        }
    }
}

/// TCP reachability of `target` (`host:port`) within `timeout`.
pub async fn probe(target: &str, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect(target)).await,
        Ok(Ok(_))
    )
}

/// Periodically probe `target` and feed the result into `signal`.
pub fn spawn_probe(
    signal: ConnectivitySignal,
    target: String,
    interval: Duration,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let online = probe(&target, timeout).await;
            debug!(%target, online, "connectivity probe");
            if signal.set_online(online) {
                info!(%target, "connectivity restored");
            }
        }
    })
}
