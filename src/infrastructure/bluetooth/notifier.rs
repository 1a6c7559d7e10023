//! Inbound notifications from the TX characteristic.

use crate::infrastructure::bluetooth::error::TransportError;
use crate::infrastructure::bluetooth::lock;
use crate::infrastructure::bluetooth::protocol;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub type InboundHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Default)]
pub struct InboundNotifier {
    handler: Mutex<Option<InboundHandler>>,
    strict_ascii: bool,
}

impl InboundNotifier {
    pub fn new(strict_ascii: bool) -> Self {
        Self {
            handler: Mutex::new(None),
            strict_ascii,
        }
    }

    /// Replace the registered handler
    pub fn set_handler(&self, handler: InboundHandler) {
        *lock(&self.handler) = Some(handler);
    }

    /// Decode one notification and pass it on. Text is dropped silently when
    /// no handler is registered.
    pub fn on_notification(&self, bytes: &[u8]) -> Result<String, TransportError> {
        let text = if self.strict_ascii {
            protocol::decode_inbound_ascii(bytes)?
        } else {
            protocol::decode_inbound(bytes)
        };
        debug!("Received: {:?}", text);

        let handler = lock(&self.handler).clone();
        if let Some(handler) = handler {
            handler(&text);
        }
        Ok(text)
    }
}
