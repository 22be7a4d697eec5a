//! Device-side half of the protocol: command dispatch, output state and an
//! in-process virtual board that speaks the same frames as the hardware.

pub mod actuator;
pub mod dispatcher;
pub mod simulator;

pub use actuator::{Actuator, ActuatorCall, ActuatorError, RecordingActuator};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use simulator::VirtualDevice;

use serde::{Deserialize, Serialize};

use crate::serial::{CodecError, FirmwareVersion};

pub const FIRMWARE_VERSION: FirmwareVersion = FirmwareVersion::new(2, 0, 1);

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Actuator(#[from] ActuatorError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceSettings {
    pub version: FirmwareVersion,
    /// Timer ticks between unsolicited status frames; 0 disables the push.
    pub status_push_ticks: u8,
    /// Acknowledge every received transfer with an 0xEE echo frame.
    pub echo_frames: bool,
    pub boot_greeting: bool,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            version: FIRMWARE_VERSION,
            status_push_ticks: 5,
            echo_frames: false,
            boot_greeting: true,
        }
    }
}
