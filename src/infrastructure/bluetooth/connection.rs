//! BLE Connection Session
//!
//! One [`ConnectionSession`] covers one connection attempt to one
//! peripheral: selection, GATT connect, discovery, notification subscribe,
//! writes and teardown. Sessions are single-use; reconnecting means building
//! a new one so characteristic handles from a dead link are never reused.

use crate::domain::models::{DeviceFilter, DisconnectReason, SessionState};
use crate::infrastructure::bluetooth::backend::{BleAdapter, BleDevice, LinkEvent};
use crate::infrastructure::bluetooth::error::{ConnectStage, TransportError};
use crate::infrastructure::bluetooth::lock;
use crate::infrastructure::bluetooth::notifier::{InboundHandler, InboundNotifier};
use crate::infrastructure::bluetooth::protocol::UartProfile;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub type DisconnectHandler = Arc<dyn Fn(DisconnectReason) + Send + Sync>;

/// Device and characteristics of a ready link
struct Link<D: BleDevice> {
    device: Arc<D>,
    write_char: D::Characteristic,
    // Held so the subscription handle lives exactly as long as the link
    _notify_char: D::Characteristic,
}

pub struct ConnectionSession<D: BleDevice> {
    profile: UartProfile,
    state: watch::Sender<SessionState>,
    link: Mutex<Option<Link<D>>>,
    used: AtomicBool,
    // Set by `disconnect`; a connect still in flight gives up when it sees it
    cancelled: AtomicBool,
    notifier: InboundNotifier,
    disconnect_handlers: Mutex<Vec<DisconnectHandler>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<D: BleDevice> ConnectionSession<D> {
    pub fn new(profile: UartProfile, strict_ascii: bool) -> Self {
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            profile,
            state,
            link: Mutex::new(None),
            used: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            notifier: InboundNotifier::new(strict_ascii),
            disconnect_handlers: Mutex::new(Vec::new()),
            pump: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    /// Watch state transitions
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Called once when a ready link goes away, whoever closed it
    pub fn on_disconnected(&self, handler: impl Fn(DisconnectReason) + Send + Sync + 'static) {
        lock(&self.disconnect_handlers).push(Arc::new(handler));
    }

    /// Receives decoded text from the notify characteristic
    pub fn on_notification(&self, handler: impl Fn(&str) + Send + Sync + 'static) {
        let handler: InboundHandler = Arc::new(handler);
        self.notifier.set_handler(handler);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Intermediate connect states are not published once cancelled
    fn advance(&self, next: SessionState) {
        if !self.is_cancelled() {
            self.set_state(next);
        }
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Session state: {} -> {}", previous, next);
        }
    }

    /// Run the full connect sequence
    ///
    /// Selection → GATT connect → service lookup → write characteristic →
    /// notify characteristic → subscribe. Any failure returns the session to
    /// `Disconnected` and reports the stage that failed.
    pub async fn connect<A>(
        self: &Arc<Self>,
        adapter: &A,
        filter: &DeviceFilter,
    ) -> Result<(), TransportError>
    where
        A: BleAdapter<Device = D>,
    {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(TransportError::SessionSpent);
        }

        self.advance(SessionState::Connecting);
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let link = match self.establish(adapter, filter, events_tx).await {
            Ok(link) => link,
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                return Err(e);
            }
        };

        // Publishing under the link lock orders this against `disconnect`
        let device = {
            let mut slot = lock(&self.link);
            if !self.is_cancelled() {
                *slot = Some(link);
                self.set_state(SessionState::Ready);
                *lock(&self.pump) = Some(self.spawn_event_pump(events_rx));
                return Ok(());
            }
            link.device
        };

        info!("Disconnect requested while connecting, closing link");
        if let Err(e) = device.disconnect().await {
            warn!("Disconnect after aborted connect: {}", e);
        }
        self.set_state(SessionState::Disconnected);
        Err(TransportError::Aborted)
    }

    async fn establish<A>(
        &self,
        adapter: &A,
        filter: &DeviceFilter,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Link<D>, TransportError>
    where
        A: BleAdapter<Device = D>,
    {
        info!("Requesting Bluetooth device...");
        let device = adapter
            .request_device(filter, self.profile.service)
            .await
            .map_err(|e| TransportError::connect(ConnectStage::Selection, e))?
            .ok_or(TransportError::SelectionCancelled)?;
        let device = Arc::new(device);
        let name = device.name().unwrap_or_else(|| "(unnamed)".to_string());

        info!("Connecting to GATT server on {}...", name);
        device
            .connect(events)
            .await
            .map_err(|e| TransportError::connect(ConnectStage::Connect, e))?;
        self.advance(SessionState::Discovering);

        match self.discover(&device).await {
            Ok((write_char, notify_char)) => {
                info!("Connected to {}", name);
                Ok(Link {
                    device,
                    write_char,
                    _notify_char: notify_char,
                })
            }
            Err(e) => {
                // Leave nothing half-open behind
                if let Err(close_err) = device.disconnect().await {
                    warn!("Disconnect after failed discovery: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn discover(
        &self,
        device: &D,
    ) -> Result<(D::Characteristic, D::Characteristic), TransportError> {
        let profile = self.profile;

        info!("Getting UART service...");
        let found = device
            .has_primary_service(profile.service)
            .await
            .map_err(|e| TransportError::connect(ConnectStage::ServiceLookup, e))?;
        if !found {
            return Err(TransportError::connect(
                ConnectStage::ServiceLookup,
                format!("service {} not found", profile.service),
            ));
        }

        let lookup = |uuid: Uuid| async move {
            device
                .characteristic(profile.service, uuid)
                .await
                .map_err(|e| TransportError::connect(ConnectStage::CharacteristicLookup, e))
                .and_then(|found| {
                    found.ok_or_else(|| {
                        TransportError::connect(
                            ConnectStage::CharacteristicLookup,
                            format!("characteristic {} not found", uuid),
                        )
                    })
                })
        };

        info!("Getting RX (write) characteristic...");
        let write_char = lookup(profile.write_char).await?;

        info!("Getting TX (notify) characteristic...");
        let notify_char = lookup(profile.notify_char).await?;

        device
            .subscribe(&notify_char)
            .await
            .map_err(|e| TransportError::connect(ConnectStage::Subscribe, e))?;

        Ok((write_char, notify_char))
    }

    /// Forward stack events until the link goes down
    fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> JoinHandle<()> {
        let session: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(strong) = session.upgrade() else {
                    return;
                };
                match event {
                    LinkEvent::Notification(bytes) => {
                        if let Err(e) = strong.notifier.on_notification(&bytes) {
                            warn!("Dropped inbound notification: {}", e);
                        }
                    }
                    LinkEvent::Disconnected => {
                        strong.handle_link_lost();
                        return;
                    }
                }
            }
            // Backend dropped its sender without reporting; treat as lost
            if let Some(session) = session.upgrade() {
                session.handle_link_lost();
            }
        })
    }

    /// Stack-side disconnect. Safe to call at any time.
    fn handle_link_lost(&self) {
        let had_link = lock(&self.link).take().is_some();
        self.set_state(SessionState::Disconnected);
        if had_link {
            warn!("Device disconnected");
            self.notify_disconnected(DisconnectReason::LinkLost);
        }
    }

    fn notify_disconnected(&self, reason: DisconnectReason) {
        let handlers = lock(&self.disconnect_handlers).clone();
        for handler in handlers {
            handler(reason);
        }
    }

    /// Write one payload to the RX characteristic
    ///
    /// Fails with `NotConnected` unless the session is `Ready`. If the link
    /// drops while the write is outstanding, the write fails instead of
    /// waiting on the radio.
    pub async fn write(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        let (device, write_char) = {
            let link = lock(&self.link);
            match link.as_ref() {
                Some(link) if self.is_ready() => (link.device.clone(), link.write_char.clone()),
                _ => return Err(TransportError::NotConnected),
            }
        };

        let mut state = self.state.subscribe();
        let link_down = async move {
            let _ = state.wait_for(|s| *s != SessionState::Ready).await;
        };
        tokio::select! {
            result = device.write(&write_char, &payload) => {
                result.map_err(|e| TransportError::Write(e.to_string()))
            }
            () = link_down => {
                Err(TransportError::Write("link went down during write".to_string()))
            }
        }
    }

    /// Close the link. Idempotent; local state is always cleared even when
    /// the radio refuses the disconnect request.
    ///
    /// A connect still in progress is abandoned: it closes whatever it opened
    /// and fails with `Aborted`.
    pub async fn disconnect(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let link = lock(&self.link).take();
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
        self.set_state(SessionState::Disconnected);

        if let Some(link) = link {
            if let Err(e) = link.device.disconnect().await {
                error!("GATT disconnect failed: {}", e);
            }
            info!("Disconnected");
            self.notify_disconnected(DisconnectReason::Requested);
        }
    }
}
