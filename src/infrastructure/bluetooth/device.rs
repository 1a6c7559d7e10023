//! btleplug peripheral backing a connection session.

use crate::infrastructure::bluetooth::backend::{BleDevice, LinkEvent};
use crate::infrastructure::bluetooth::error::BackendError;
use crate::infrastructure::bluetooth::lock;
use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};
use uuid::Uuid;

pub struct BtleDevice {
    adapter: Adapter,
    peripheral: Peripheral,
    name: Option<String>,
    write_type: WriteType,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BtleDevice {
    pub fn new(
        adapter: Adapter,
        peripheral: Peripheral,
        name: Option<String>,
        write_type: WriteType,
    ) -> Self {
        Self {
            adapter,
            peripheral,
            name,
            write_type,
            events: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn event_sender(&self) -> Result<mpsc::UnboundedSender<LinkEvent>, BackendError> {
        lock(&self.events).clone().ok_or(BackendError::LinkDown)
    }

    fn stop_forwarding(&self) {
        lock(&self.events).take();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl BleDevice for BtleDevice {
    type Characteristic = Characteristic;

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    async fn connect(&self, events: mpsc::UnboundedSender<LinkEvent>) -> Result<(), BackendError> {
        // Subscribe before connecting so an immediate drop is not missed
        let mut central_events = self.adapter.events().await?;
        let id = self.peripheral.id();
        let sender = events.clone();
        let watcher = tokio::spawn(async move {
            while let Some(event) = central_events.next().await {
                if let CentralEvent::DeviceDisconnected(gone) = event {
                    if gone == id {
                        info!("Stack reported disconnect for {:?}", gone);
                        let _ = sender.send(LinkEvent::Disconnected);
                        break;
                    }
                }
            }
        });
        lock(&self.tasks).push(watcher);
        *lock(&self.events) = Some(events);

        if let Err(e) = self.peripheral.connect().await {
            self.stop_forwarding();
            return Err(e.into());
        }
        Ok(())
    }

    async fn has_primary_service(&self, service: Uuid) -> Result<bool, BackendError> {
        self.peripheral.discover_services().await?;
        let services = self.peripheral.services();
        debug!("Discovered {} services", services.len());
        Ok(services.iter().any(|s| s.uuid == service))
    }

    async fn characteristic(
        &self,
        service: Uuid,
        uuid: Uuid,
    ) -> Result<Option<Characteristic>, BackendError> {
        Ok(self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid && c.service_uuid == service))
    }

    async fn subscribe(&self, characteristic: &Characteristic) -> Result<(), BackendError> {
        let sender = self.event_sender()?;
        let mut notifications = self.peripheral.notifications().await?;
        self.peripheral.subscribe(characteristic).await?;

        let uuid = characteristic.uuid;
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                trace!("Notification: {} bytes", notification.value.len());
                if sender.send(LinkEvent::Notification(notification.value)).is_err() {
                    break;
                }
            }
        });
        lock(&self.tasks).push(forwarder);
        Ok(())
    }

    async fn write(
        &self,
        characteristic: &Characteristic,
        payload: &[u8],
    ) -> Result<(), BackendError> {
        self.peripheral
            .write(characteristic, payload, self.write_type)
            .await?;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        self.stop_forwarding();
        if self.peripheral.is_connected().await? {
            self.peripheral.disconnect().await?;
        }
        Ok(())
    }
}

impl Drop for BtleDevice {
    fn drop(&mut self) {
        self.stop_forwarding();
    }
}
