//! In-memory radio used by the transport tests.

use crate::domain::models::DeviceFilter;
use crate::infrastructure::bluetooth::backend::{BleAdapter, BleDevice, LinkEvent};
use crate::infrastructure::bluetooth::error::BackendError;
use crate::infrastructure::bluetooth::lock;
use crate::infrastructure::bluetooth::protocol::{RX_CHAR_UUID, SERVICE_UUID, TX_CHAR_UUID};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

#[derive(Default)]
struct MockState {
    fail_connect: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_disconnect: AtomicBool,
    fail_next_write: AtomicBool,
    subscribed: AtomicBool,
    disconnect_calls: AtomicUsize,
    characteristics: Mutex<Vec<Uuid>>,
    services: Mutex<Vec<Uuid>>,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    writes: Mutex<Vec<Vec<u8>>>,
}

/// Cloneable handle; clones share the same simulated peripheral
#[derive(Clone)]
pub struct MockDevice {
    name: String,
    state: Arc<MockState>,
    // `true` lets the operation proceed
    discovery_gate: Arc<watch::Sender<bool>>,
    write_gate: Arc<watch::Sender<bool>>,
}

impl MockDevice {
    /// A peripheral exposing the Nordic UART service
    pub fn uart(name: &str) -> Self {
        let state = MockState::default();
        *lock(&state.services) = vec![SERVICE_UUID];
        *lock(&state.characteristics) = vec![RX_CHAR_UUID, TX_CHAR_UUID];
        Self {
            name: name.to_string(),
            state: Arc::new(state),
            discovery_gate: Arc::new(watch::channel(true).0),
            write_gate: Arc::new(watch::channel(true).0),
        }
    }

    pub fn failing_connect(self) -> Self {
        self.state.fail_connect.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_subscribe(self) -> Self {
        self.state.fail_subscribe.store(true, Ordering::SeqCst);
        self
    }

    pub fn failing_disconnect(self) -> Self {
        self.state.fail_disconnect.store(true, Ordering::SeqCst);
        self
    }

    pub fn without_service(self) -> Self {
        lock(&self.state.services).clear();
        self
    }

    pub fn without_write_char(self) -> Self {
        lock(&self.state.characteristics).retain(|c| *c != RX_CHAR_UUID);
        self
    }

    pub fn without_notify_char(self) -> Self {
        lock(&self.state.characteristics).retain(|c| *c != TX_CHAR_UUID);
        self
    }

    pub fn pause_discovery(&self) {
        self.discovery_gate.send_replace(false);
    }

    pub fn resume_discovery(&self) {
        self.discovery_gate.send_replace(true);
    }

    /// Writes stay outstanding until released
    pub fn hold_writes(&self) {
        self.write_gate.send_replace(false);
    }

    pub fn release_writes(&self) {
        self.write_gate.send_replace(true);
    }

    pub fn fail_next_write(&self) {
        self.state.fail_next_write.store(true, Ordering::SeqCst);
    }

    pub fn emit_disconnect(&self) {
        if let Some(events) = lock(&self.state.events).take() {
            let _ = events.send(LinkEvent::Disconnected);
        }
    }

    pub fn emit_notification(&self, bytes: &[u8]) {
        if let Some(events) = lock(&self.state.events).as_ref() {
            let _ = events.send(LinkEvent::Notification(bytes.to_vec()));
        }
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        lock(&self.state.writes).clone()
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.subscribed.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state.disconnect_calls.load(Ordering::SeqCst)
    }
}

async fn pass(gate: &watch::Sender<bool>) {
    let mut rx = gate.subscribe();
    let _ = rx.wait_for(|open| *open).await;
}

#[async_trait]
impl BleDevice for MockDevice {
    type Characteristic = Uuid;

    fn name(&self) -> Option<String> {
        Some(self.name.clone())
    }

    async fn connect(&self, events: mpsc::UnboundedSender<LinkEvent>) -> Result<(), BackendError> {
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(BackendError::Other("connection refused".into()));
        }
        *lock(&self.state.events) = Some(events);
        Ok(())
    }

    async fn has_primary_service(&self, service: Uuid) -> Result<bool, BackendError> {
        pass(&self.discovery_gate).await;
        Ok(lock(&self.state.services).contains(&service))
    }

    async fn characteristic(
        &self,
        _service: Uuid,
        uuid: Uuid,
    ) -> Result<Option<Uuid>, BackendError> {
        Ok(lock(&self.state.characteristics)
            .iter()
            .find(|c| **c == uuid)
            .copied())
    }

    async fn subscribe(&self, _characteristic: &Uuid) -> Result<(), BackendError> {
        if self.state.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BackendError::Other("CCCD write rejected".into()));
        }
        self.state.subscribed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn write(&self, _characteristic: &Uuid, payload: &[u8]) -> Result<(), BackendError> {
        pass(&self.write_gate).await;
        if self.state.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Other("GATT write failed".into()));
        }
        lock(&self.state.writes).push(payload.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.state.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.state.events).take();
        if self.state.fail_disconnect.load(Ordering::SeqCst) {
            return Err(BackendError::LinkDown);
        }
        Ok(())
    }
}

/// Hands out queued devices, one per request
pub struct MockAdapter {
    offers: Mutex<VecDeque<MockDevice>>,
}

impl MockAdapter {
    pub fn offering(devices: Vec<MockDevice>) -> Self {
        Self {
            offers: Mutex::new(devices.into()),
        }
    }
}

#[async_trait]
impl BleAdapter for MockAdapter {
    type Device = MockDevice;

    async fn request_device(
        &self,
        filter: &DeviceFilter,
        _service: Uuid,
    ) -> Result<Option<MockDevice>, BackendError> {
        let mut offers = lock(&self.offers);
        let Some(device) = offers.pop_front() else {
            return Ok(None);
        };
        if filter.matches(Some(&device.name)) {
            Ok(Some(device))
        } else {
            Ok(None)
        }
    }
}
