//! Session bookkeeping: readiness flag, latest login QR, and a watcher that
//! polls the gateway for connection changes.

use crate::adapter::MessagingAdapter;
use crate::types::*;
use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};

/// Shared view of the session used by request handlers.
#[derive(Debug, Default)]
pub struct SessionState {
    ready: AtomicBool,
    qr: RwLock<Option<LoginQr>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn latest_qr(&self) -> Option<LoginQr> {
        self.qr.read().await.clone()
    }

    /// Fold a session event into the state.
    ///
    /// A new QR replaces the previous one. Ready clears the QR since it has
    /// been consumed; Disconnected clears readiness.
    pub async fn apply(&self, event: &ClientEvent) {
        match event {
            ClientEvent::Qr(qr) => {
                *self.qr.write().await = Some(qr.clone());
            }
            ClientEvent::Ready => {
                self.ready.store(true, Ordering::SeqCst);
                *self.qr.write().await = None;
            }
            ClientEvent::Disconnected(_) => {
                self.ready.store(false, Ordering::SeqCst);
            }
            ClientEvent::Message(_) => {}
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Watcher
// ═══════════════════════════════════════════════════════════════════════

/// Drives the session lifecycle against the gateway.
///
/// On start it asks the gateway to connect the instance. Afterwards it polls
/// the connection state and turns transitions into [`ClientEvent`]s. While
/// the session is not open it re-requests the login QR so a rotated code
/// reaches clients even without gateway webhooks.
pub struct SessionWatcher {
    adapter: Arc<dyn MessagingAdapter>,
    interval: Duration,
    last_state: ConnectionState,
    last_qr: Option<String>,
}

impl SessionWatcher {
    pub fn new(adapter: Arc<dyn MessagingAdapter>, interval: Duration) -> Self {
        Self {
            adapter,
            interval: interval.max(Duration::from_millis(100)),
            last_state: ConnectionState::Unknown,
            last_qr: None,
        }
    }

    /// Initial connect. Yields a QR, or Ready if the session is already open.
    pub async fn startup(&mut self) -> Vec<ClientEvent> {
        match self.adapter.connect().await {
            Ok(None) => {
                info!("Session already authenticated");
                self.last_state = ConnectionState::Open;
                vec![ClientEvent::Ready]
            }
            Ok(Some(qr)) => {
                self.last_state = ConnectionState::Connecting;
                self.take_qr(qr).into_iter().collect()
            }
            Err(e) => {
                warn!("Initial gateway connect failed: {}", e);
                Vec::new()
            }
        }
    }

    /// One poll step.
    pub async fn poll_once(&mut self) -> Vec<ClientEvent> {
        let state = match self.adapter.connection_state().await {
            Ok(s) => s,
            Err(e) => {
                debug!("Connection state poll failed: {}", e);
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        let was_open = self.last_state.is_open();

        if state.is_open() && !was_open {
            info!("Session is open");
            self.last_qr = None;
            events.push(ClientEvent::Ready);
        } else if !state.is_open() && was_open {
            warn!("Session left open state: {:?}", state);
            events.push(ClientEvent::Disconnected(format!("{:?}", state).to_lowercase()));
        }

        if !state.is_open() {
            match self.adapter.connect().await {
                Ok(Some(qr)) => events.extend(self.take_qr(qr)),
                Ok(None) => {}
                Err(e) => debug!("QR refresh failed: {}", e),
            }
        }

        self.last_state = state;
        events
    }

    fn take_qr(&mut self, qr: LoginQr) -> Option<ClientEvent> {
        if self.last_qr.as_deref() == Some(qr.payload()) {
            return None;
        }
        info!("New login QR received");
        self.last_qr = Some(qr.payload().to_string());
        Some(ClientEvent::Qr(qr))
    }

    /// Run until `shutdown` flips to `true` or the receiver side of `events`
    /// is dropped.
    pub async fn run(
        mut self,
        events: mpsc::Sender<ClientEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        for event in self.startup().await {
            if events.send(event).await.is_err() {
                return;
            }
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for event in self.poll_once().await {
                        if events.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Session watcher stopping");
                        return;
                    }
                }
            }
        }
    }
}
