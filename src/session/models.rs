use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::serial::{DeviceState, FirmwareVersion};

/// Host view of the link to the board
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Open and heard from within the stale threshold
    Connected,
    /// Open, but silent for longer than the stale threshold
    Stale,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Stale)
    }
}

/// Per-connection bookkeeping; exists from a connect attempt until disconnect.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: Uuid,
    pub endpoint: String,
    pub connection_state: ConnectionState,
    pub last_communication: Option<Instant>,
    pub boot_message_observed: bool,
    pub device_state_mirror: Option<DeviceState>,
    pub firmware_version: Option<FirmwareVersion>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new(endpoint: &str) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            endpoint: endpoint.to_string(),
            connection_state: ConnectionState::Connecting,
            last_communication: None,
            boot_message_observed: false,
            device_state_mirror: None,
            firmware_version: None,
            connected_at: None,
            last_seen: None,
        }
    }

    /// Liveness predicate: heard from the device within `threshold` of `now`.
    pub fn is_active(&self, now: Instant, threshold: Duration) -> bool {
        self.last_communication
            .map(|last| now.saturating_duration_since(last) < threshold)
            .unwrap_or(false)
    }

    pub fn snapshot(&self, now: Instant, threshold: Duration) -> SessionSnapshot {
        SessionSnapshot {
            session_id: Some(self.session_id),
            endpoint: Some(self.endpoint.clone()),
            connection_state: self.connection_state,
            active: self.connection_state.is_open() && self.is_active(now, threshold),
            boot_message_observed: self.boot_message_observed,
            device_state: self.device_state_mirror,
            firmware_version: self.firmware_version,
            ms_since_last_communication: self
                .last_communication
                .map(|last| now.saturating_duration_since(last).as_millis() as u64),
            connected_at: self.connected_at,
            last_seen: self.last_seen,
        }
    }
}

/// Serializable point-in-time copy of the session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub session_id: Option<Uuid>,
    pub endpoint: Option<String>,
    pub connection_state: ConnectionState,
    pub active: bool,
    pub boot_message_observed: bool,
    pub device_state: Option<DeviceState>,
    pub firmware_version: Option<FirmwareVersion>,
    pub ms_since_last_communication: Option<u64>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl SessionSnapshot {
    pub fn disconnected() -> Self {
        Self {
            session_id: None,
            endpoint: None,
            connection_state: ConnectionState::Disconnected,
            active: false,
            boot_message_observed: false,
            device_state: None,
            firmware_version: None,
            ms_since_last_communication: None,
            connected_at: None,
            last_seen: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionEvent {
    StateChanged { from: ConnectionState, to: ConnectionState },
    BootMessage { bytes: usize },
    NoBootMessage,
    MirrorUpdated(DeviceState),
    VersionReported(FirmwareVersion),
    HeartbeatMissed,
    LinkError(String),
}

/// Outcome of a successful connect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectReport {
    pub session_id: Uuid,
    pub endpoint: String,
    pub boot_message_observed: bool,
    pub boot_bytes: usize,
    pub firmware_version: Option<FirmwareVersion>,
}
