//! Fixed-rate sensor streaming.
//!
//! Samples the latest [`SensorFrame`] on every tick and hands the encoded
//! packet to a [`PacketSink`]. The tick rate is independent of how fast the
//! vision side produces frames.

use crate::domain::models::SensorFrame;
use crate::infrastructure::bluetooth::error::TransportError;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::service::PacketSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{trace, warn};

pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

pub struct SensorTicker<S: PacketSink> {
    sink: Arc<S>,
    frames: watch::Receiver<SensorFrame>,
    period: Duration,
    newline: bool,
}

impl<S: PacketSink> SensorTicker<S> {
    pub fn new(
        sink: Arc<S>,
        frames: watch::Receiver<SensorFrame>,
        period: Duration,
        newline: bool,
    ) -> Self {
        Self {
            sink,
            frames,
            period,
            newline,
        }
    }

    /// Run one tick. Returns whether a packet was queued.
    ///
    /// Nothing is queued while the link is down; the tick is simply skipped.
    pub fn tick(&self) -> bool {
        if !self.sink.is_ready() {
            trace!("Link not ready, skipping tick");
            return false;
        }

        let frame = *self.frames.borrow();
        let packet = protocol::encode_packet(&frame, self.newline);
        let outcome = self.sink.submit(packet);

        tokio::spawn(async move {
            match outcome.await {
                Ok(()) => trace!("Packet sent"),
                Err(TransportError::NotConnected) => trace!("Link dropped before packet was sent"),
                Err(e) => warn!("Error sending data: {}", e),
            }
        });
        true
    }

    /// Tick forever on a fixed period. Abort the handle to stop.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                self.tick();
            }
        })
    }
}
