//! Bluetooth Module
//!
//! BLE UART link to the face-tracking firmware.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                      UartService                         │
//! │   (owns the live session and its queue; public API)      │
//! └──────────┬──────────────────┬──────────────────┬────────┘
//!            │                  │                  │
//!            ▼                  ▼                  ▼
//! ┌──────────────────┐ ┌────────────────┐ ┌────────────────┐
//! │ ConnectionSession│ │ TransportQueue │ │    Protocol    │
//! │                  │ │                │ │                │
//! │ - selection      │ │ - strict FIFO  │ │ - UUIDs        │
//! │ - GATT discovery │ │ - one GATT op  │ │ - packet codec │
//! │ - notifications  │ │   in flight    │ │                │
//! └────────┬─────────┘ └────────────────┘ └────────────────┘
//!          │
//!          ▼
//! ┌──────────────────┐
//! │ BleAdapter /     │   btleplug: scanner + device
//! │ BleDevice traits │
//! └──────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UART UUIDs, packet encoding, inbound decoding
//! - [`backend`] - Traits the session uses to reach the radio
//! - [`scanner`] - btleplug adapter and device selection
//! - [`device`] - btleplug peripheral implementation
//! - [`connection`] - Connection session lifecycle and writes
//! - [`queue`] - Serialized GATT operation queue
//! - [`notifier`] - Inbound notification decoding
//! - [`service`] - Controller owning the live session
//! - [`ticker`] - Fixed-rate packet producer

pub mod backend;
pub mod connection;
pub mod device;
pub mod error;
pub mod notifier;
pub mod protocol;
pub mod queue;
pub mod scanner;
pub mod service;
pub mod ticker;

#[cfg(test)]
pub(crate) mod mock;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use connection::ConnectionSession;
pub use error::{BackendError, ConnectStage, TransportError};
pub use queue::TransportQueue;
pub use scanner::BtleAdapter;
pub use service::UartService;
pub use ticker::SensorTicker;

/// Lock ignoring poisoning; the guarded data stays consistent across panics
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
