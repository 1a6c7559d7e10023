use std::fmt;
use thiserror::Error;

/// Step of the connect sequence that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStage {
    Selection,
    Connect,
    ServiceLookup,
    CharacteristicLookup,
    Subscribe,
}

impl fmt::Display for ConnectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Selection => "device selection",
            Self::Connect => "GATT connect",
            Self::ServiceLookup => "service lookup",
            Self::CharacteristicLookup => "characteristic lookup",
            Self::Subscribe => "notification subscribe",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the UART transport
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("device selection cancelled")]
    SelectionCancelled,

    #[error("connect failed during {stage}: {reason}")]
    Connect { stage: ConnectStage, reason: String },

    #[error("not connected")]
    NotConnected,

    #[error("write failed: {0}")]
    Write(String),

    #[error("malformed inbound data: {0}")]
    Decode(String),

    #[error("connect aborted by disconnect")]
    Aborted,

    #[error("session was already used; reconnect with a fresh session")]
    SessionSpent,
}

impl TransportError {
    pub fn connect(stage: ConnectStage, reason: impl fmt::Display) -> Self {
        Self::Connect {
            stage,
            reason: reason.to_string(),
        }
    }

    /// Stage of a connect failure, if this is one
    pub fn stage(&self) -> Option<ConnectStage> {
        match self {
            Self::Connect { stage, .. } => Some(*stage),
            Self::SelectionCancelled => Some(ConnectStage::Selection),
            _ => None,
        }
    }
}

/// Errors from the radio backend
#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Btle(#[from] btleplug::Error),

    #[error("no Bluetooth adapter available")]
    NoAdapter,

    #[error("link is not connected")]
    LinkDown,

    #[error("{0}")]
    Other(String),
}
