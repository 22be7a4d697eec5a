pub mod codec;
pub mod interface;
pub mod protocol;

pub use codec::{CodecError, CommandFrame, ResponseFrame};
pub use interface::{SerialConnector, SerialInterface};
pub use protocol::{Command, DeviceState, DimmerId, FirmwareVersion, Opcode, RelayId};

use std::time::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Port not found: {0}")]
    PortNotFound(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Communication timeout")]
    Timeout,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;

/// Byte-oriented link to a PowerPack board.
///
/// Each successful `read` is expected to carry whole frames as delivered by
/// the virtual COM link; no reassembly happens across reads.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Read up to `max_bytes`, failing with [`SerialError::Timeout`] when
    /// nothing arrives within `timeout`.
    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>>;

    /// Write a complete buffer and flush it.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Drop any bytes already buffered on the receive side.
    async fn clear_input(&mut self) -> Result<()>;

    fn close(&mut self);
}

/// Opens transports by endpoint name (a COM port, a tty path, a simulator id).
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Transport>>;
}
