//! Radio backend traits
//!
//! The session only talks to the radio through these traits. The btleplug
//! implementation lives in [`super::scanner`] and [`super::device`].

use crate::domain::models::DeviceFilter;
use crate::infrastructure::bluetooth::error::BackendError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events pushed by the stack for one connected device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Notification(Vec<u8>),
    Disconnected,
}

#[async_trait]
pub trait BleAdapter: Send + Sync + 'static {
    type Device: BleDevice;

    /// Offer peripherals matching `filter` and return the chosen one.
    /// `Ok(None)` means nothing was chosen.
    async fn request_device(
        &self,
        filter: &DeviceFilter,
        service: Uuid,
    ) -> Result<Option<Self::Device>, BackendError>;
}

#[async_trait]
pub trait BleDevice: Send + Sync + 'static {
    type Characteristic: Clone + Send + Sync + 'static;

    fn name(&self) -> Option<String>;

    /// Open the GATT connection. Disconnects and notifications for this
    /// device are delivered on `events` from here on.
    async fn connect(&self, events: mpsc::UnboundedSender<LinkEvent>) -> Result<(), BackendError>;

    /// Discover services and report whether `service` is present.
    async fn has_primary_service(&self, service: Uuid) -> Result<bool, BackendError>;

    async fn characteristic(
        &self,
        service: Uuid,
        uuid: Uuid,
    ) -> Result<Option<Self::Characteristic>, BackendError>;

    async fn subscribe(&self, characteristic: &Self::Characteristic) -> Result<(), BackendError>;

    async fn write(
        &self,
        characteristic: &Self::Characteristic,
        payload: &[u8],
    ) -> Result<(), BackendError>;

    async fn disconnect(&self) -> Result<(), BackendError>;
}
