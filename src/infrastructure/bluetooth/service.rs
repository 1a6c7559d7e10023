//! UART Service Module
//!
//! Controller that owns the single live [`ConnectionSession`] and the
//! [`TransportQueue`] serializing its writes. Each connect builds a fresh
//! session and queue; a disconnect tears both down.

use crate::domain::models::{AppEvent, DeviceFilter, MessageSeverity, SessionState, StatusMessage};
use crate::infrastructure::bluetooth::backend::{BleAdapter, BleDevice};
use crate::infrastructure::bluetooth::connection::ConnectionSession;
use crate::infrastructure::bluetooth::error::TransportError;
use crate::infrastructure::bluetooth::lock;
use crate::infrastructure::bluetooth::protocol::UartProfile;
use crate::infrastructure::bluetooth::queue::TransportQueue;
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::info;

/// Destination for encoded packets
pub trait PacketSink: Send + Sync + 'static {
    fn is_ready(&self) -> bool;

    /// Queue one payload. The future resolves with this payload's outcome.
    fn submit(&self, payload: Vec<u8>) -> BoxFuture<'static, Result<(), TransportError>>;
}

struct ActiveLink<D: BleDevice> {
    session: Arc<ConnectionSession<D>>,
    queue: TransportQueue,
}

enum LinkSlot<D: BleDevice> {
    Idle,
    Connecting(Arc<ConnectionSession<D>>),
    Ready(ActiveLink<D>),
}

pub struct UartService<A: BleAdapter> {
    adapter: A,
    profile: UartProfile,
    strict_ascii: bool,
    slot: Mutex<LinkSlot<A::Device>>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl<A: BleAdapter> UartService<A> {
    pub fn new(
        adapter: A,
        profile: UartProfile,
        strict_ascii: bool,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            adapter,
            profile,
            strict_ascii,
            slot: Mutex::new(LinkSlot::Idle),
            event_sender,
        }
    }

    /// Connect to a peripheral accepted by `filter`, replacing any previous link
    pub async fn connect(&self, filter: &DeviceFilter) -> Result<(), TransportError> {
        self.disconnect().await;

        let session = Arc::new(ConnectionSession::new(self.profile, self.strict_ascii));
        self.register_observers(&session);
        *lock(&self.slot) = LinkSlot::Connecting(session.clone());

        self.send_state(SessionState::Connecting);
        self.send_log("Connecting to device...", MessageSeverity::Info);

        let result = match session.connect(&self.adapter, filter).await {
            Ok(()) => self.promote(&session).await,
            Err(e) => {
                self.release(&session);
                Err(e)
            }
        };

        match result {
            Ok(()) => {
                self.send_state(SessionState::Ready);
                self.send_log("Connection established!", MessageSeverity::Success);
                Ok(())
            }
            Err(e) => {
                let severity = match e {
                    TransportError::SelectionCancelled | TransportError::Aborted => {
                        MessageSeverity::Warning
                    }
                    _ => MessageSeverity::Error,
                };
                self.send_log(&format!("Connection failed: {}", e), severity);
                self.send_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Move a connected session into the ready slot, unless a disconnect
    /// claimed it first.
    async fn promote(
        &self,
        session: &Arc<ConnectionSession<A::Device>>,
    ) -> Result<(), TransportError> {
        let claimed = {
            let mut slot = lock(&self.slot);
            let ours = Self::holds(&slot, session);
            if ours {
                *slot = LinkSlot::Ready(ActiveLink {
                    session: session.clone(),
                    queue: TransportQueue::new(),
                });
            }
            ours
        };
        if claimed {
            return Ok(());
        }
        session.disconnect().await;
        Err(TransportError::Aborted)
    }

    fn release(&self, session: &Arc<ConnectionSession<A::Device>>) {
        let mut slot = lock(&self.slot);
        if Self::holds(&slot, session) {
            *slot = LinkSlot::Idle;
        }
    }

    fn holds(slot: &LinkSlot<A::Device>, session: &Arc<ConnectionSession<A::Device>>) -> bool {
        matches!(slot, LinkSlot::Connecting(current) if Arc::ptr_eq(current, session))
    }

    fn register_observers(&self, session: &ConnectionSession<A::Device>) {
        let sender = self.event_sender.clone();
        session.on_disconnected(move |reason| {
            let _ = sender.send(AppEvent::Disconnected(reason));
            let _ = sender.send(AppEvent::ConnectionState(SessionState::Disconnected));
        });

        let sender = self.event_sender.clone();
        session.on_notification(move |text| {
            let _ = sender.send(AppEvent::Inbound(text.to_string()));
        });
    }

    /// Tear down the current session and its queue. Unstarted writes fail.
    /// A connect in progress is abandoned.
    pub async fn disconnect(&self) {
        let previous = std::mem::replace(&mut *lock(&self.slot), LinkSlot::Idle);
        match previous {
            LinkSlot::Idle => {}
            LinkSlot::Connecting(session) => {
                session.disconnect().await;
                info!("Connect attempt cancelled");
            }
            LinkSlot::Ready(link) => {
                link.queue.close();
                link.session.disconnect().await;
                info!("Disconnected from device");
            }
        }
    }

    /// Writes waiting on the current link
    pub fn pending_writes(&self) -> usize {
        match &*lock(&self.slot) {
            LinkSlot::Ready(link) => link.queue.pending(),
            _ => 0,
        }
    }

    pub fn state(&self) -> SessionState {
        match &*lock(&self.slot) {
            LinkSlot::Idle => SessionState::Disconnected,
            LinkSlot::Connecting(session) => session.state(),
            LinkSlot::Ready(link) => link.session.state(),
        }
    }

    fn send_state(&self, state: SessionState) {
        let _ = self.event_sender.send(AppEvent::ConnectionState(state));
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self.event_sender.send(AppEvent::LogMessage(StatusMessage {
            message: message.to_string(),
            severity,
        }));
    }
}

impl<A: BleAdapter> PacketSink for UartService<A> {
    fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    fn submit(&self, payload: Vec<u8>) -> BoxFuture<'static, Result<(), TransportError>> {
        let slot = lock(&self.slot);
        match &*slot {
            LinkSlot::Ready(link) if link.session.is_ready() => {
                let session = link.session.clone();
                link.queue
                    .enqueue(move || async move { session.write(payload).await })
                    .boxed()
            }
            _ => future::ready(Err(TransportError::NotConnected)).boxed(),
        }
    }
}
