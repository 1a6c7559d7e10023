use serde::{Deserialize, Serialize};
use std::fmt;

/// One snapshot of the eleven face channels, as produced by the vision side.
///
/// Values are kept as plain integers so an out-of-range producer is visible
/// here; the packet encoder clamps them to their wire widths.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorFrame {
    pub face_visible: i32,
    pub face_x: i32,
    pub face_y: i32,
    pub face_distance: i32,
    pub face_yaw: i32,
    pub face_pitch: i32,
    pub mouth_openness: i32,
    pub left_eye_openness: i32,
    pub right_eye_openness: i32,
    pub face_roll: i32,
    pub smile: i32,
}

/// Which peripherals are offered during device selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFilter {
    /// Prefers peripherals advertising the UART service, then any peripheral
    AcceptAll,
    NamePrefixes(Vec<String>),
}

impl DeviceFilter {
    /// Check an advertised local name against the filter.
    ///
    /// Unnamed peripherals only pass `AcceptAll`.
    pub fn matches(&self, name: Option<&str>) -> bool {
        match self {
            Self::AcceptAll => true,
            Self::NamePrefixes(prefixes) => name
                .map(|n| prefixes.iter().any(|p| n.starts_with(p.as_str())))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Discovering,
    Ready,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Discovering => "discovering",
            Self::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Why a ready session went away
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `disconnect()` was called locally
    Requested,
    /// The BLE stack reported the link as gone
    LinkLost,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionState(SessionState),
    Disconnected(DisconnectReason),
    Inbound(String),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
