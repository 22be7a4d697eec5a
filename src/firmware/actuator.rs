use std::collections::VecDeque;
use serde::{Deserialize, Serialize};

use crate::serial::{DimmerId, RelayId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActuatorError {
    #[error("DAC bus transmit failed: {0}")]
    Bus(String),

    #[error("GPIO write failed: {0}")]
    Gpio(String),
}

/// Physical outputs driven by the command dispatcher.
///
/// Relays and dimmer enables are GPIO lines; dimmer levels go to a 12-bit
/// I2C DAC. Implementations are expected to be non-blocking apart from the
/// bus transfer itself.
pub trait Actuator: Send {
    fn set_relay(&mut self, relay: RelayId, on: bool) -> Result<(), ActuatorError>;
    fn set_dimmer(&mut self, dimmer: DimmerId, value: u16) -> Result<(), ActuatorError>;
    fn enable_dimmer(&mut self, dimmer: DimmerId, enabled: bool) -> Result<(), ActuatorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActuatorCall {
    Relay(RelayId, bool),
    Dimmer(DimmerId, u16),
    DimmerEnable(DimmerId, bool),
}

/// Most recent output writes kept by [`RecordingActuator`]
pub const MAX_RECORDED_CALLS: usize = 256;

/// Actuator that logs output writes instead of touching hardware.
///
/// Only the last [`MAX_RECORDED_CALLS`] writes are kept.
#[derive(Debug, Default, Clone)]
pub struct RecordingActuator {
    calls: VecDeque<ActuatorCall>,
    fail_bus: bool,
}

impl RecordingActuator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.calls.iter().copied().collect()
    }

    pub fn last_call(&self) -> Option<ActuatorCall> {
        self.calls.back().copied()
    }

    fn record(&mut self, call: ActuatorCall) {
        if self.calls.len() == MAX_RECORDED_CALLS {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }

    /// Make every subsequent DAC write fail, as a NACKed I2C transfer would.
    pub fn set_bus_failure(&mut self, fail: bool) {
        self.fail_bus = fail;
    }
}

impl Actuator for RecordingActuator {
    fn set_relay(&mut self, relay: RelayId, on: bool) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::Relay(relay, on));
        Ok(())
    }

    fn set_dimmer(&mut self, dimmer: DimmerId, value: u16) -> Result<(), ActuatorError> {
        if self.fail_bus {
            return Err(ActuatorError::Bus(format!("DAC channel {} NACK", dimmer.number())));
        }
        self.record(ActuatorCall::Dimmer(dimmer, value));
        Ok(())
    }

    fn enable_dimmer(&mut self, dimmer: DimmerId, enabled: bool) -> Result<(), ActuatorError> {
        self.record(ActuatorCall::DimmerEnable(dimmer, enabled));
        Ok(())
    }
}
