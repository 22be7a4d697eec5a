use serde::{Deserialize, Serialize};

use super::actuator::Actuator;
use super::{DeviceSettings, DispatchError};
use crate::serial::codec::{decode_command, CodecError, CommandFrame, ResponseFrame};
use crate::serial::protocol::DIMMER_MAX;
use crate::serial::{DeviceState, DimmerId, Opcode, RelayId};

/// What a command does once its opcode is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    SetRelay(RelayId),
    SetDimmer(DimmerId),
    EnableDimmer(DimmerId, bool),
    ReportStatus,
    ReportVersion,
}

/// Opcode to action table. Anything not listed here is an unknown command.
const COMMAND_TABLE: [(Opcode, Action); 10] = [
    (Opcode::SetRelay1, Action::SetRelay(RelayId::One)),
    (Opcode::SetRelay2, Action::SetRelay(RelayId::Two)),
    (Opcode::SetDimmer1, Action::SetDimmer(DimmerId::One)),
    (Opcode::SetDimmer2, Action::SetDimmer(DimmerId::Two)),
    (Opcode::GetStatus, Action::ReportStatus),
    (Opcode::EnableDimmer1, Action::EnableDimmer(DimmerId::One, true)),
    (Opcode::EnableDimmer2, Action::EnableDimmer(DimmerId::Two, true)),
    (Opcode::DisableDimmer1, Action::EnableDimmer(DimmerId::One, false)),
    (Opcode::DisableDimmer2, Action::EnableDimmer(DimmerId::Two, false)),
    (Opcode::GetVersion, Action::ReportVersion),
];

fn lookup(opcode: u8) -> Option<Action> {
    COMMAND_TABLE
        .iter()
        .find(|(op, _)| op.as_byte() == opcode)
        .map(|(_, action)| *action)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub frames_received: u64,
    pub commands_applied: u64,
    pub malformed_frames: u64,
    pub unknown_opcodes: u64,
    pub actuator_failures: u64,
    pub status_pushes: u64,
}

/// Device-side command processor.
///
/// Owns the device state outright. Both entry points take `&mut self`, so a
/// timer-driven status push and a command can never interleave; whoever drives
/// the dispatcher from two contexts must hold one lock around each call.
pub struct Dispatcher<A: Actuator> {
    state: DeviceState,
    actuator: A,
    settings: DeviceSettings,
    tick_count: u8,
    stats: DispatchStats,
}

impl<A: Actuator> Dispatcher<A> {
    /// Bring the outputs to their power-on state: relays off, dimmer outputs disabled.
    pub fn new(actuator: A, settings: DeviceSettings) -> Self {
        let mut dispatcher = Self {
            state: DeviceState::default(),
            actuator,
            settings,
            tick_count: 0,
            stats: DispatchStats::default(),
        };

        for relay in [RelayId::One, RelayId::Two] {
            if let Err(e) = dispatcher.actuator.set_relay(relay, false) {
                log::warn!("Relay {} init failed: {}", relay.number(), e);
            }
        }
        for dimmer in [DimmerId::One, DimmerId::Two] {
            if let Err(e) = dispatcher.actuator.enable_dimmer(dimmer, false) {
                log::warn!("Dimmer {} init failed: {}", dimmer.number(), e);
            }
        }

        dispatcher
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    pub fn settings(&self) -> &DeviceSettings {
        &self.settings
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Process one received transfer and return the frames to transmit, in order.
    pub fn handle_frame(&mut self, bytes: &[u8]) -> Vec<ResponseFrame> {
        let mut responses = Vec::new();
        self.stats.frames_received += 1;

        match decode_command(bytes) {
            Ok(frame) => {
                log::debug!("CMD: 0x{:02X}, param: {}, value: {}", frame.opcode, frame.param, frame.value);
                match self.execute(&frame) {
                    Ok(Some(response)) => responses.push(response),
                    Ok(None) => {}
                    Err(DispatchError::Codec(e)) => {
                        self.stats.unknown_opcodes += 1;
                        log::warn!("Unknown command: {}", e);
                    }
                    Err(DispatchError::Actuator(e)) => {
                        self.stats.actuator_failures += 1;
                        log::error!("Command 0x{:02X} failed: {}", frame.opcode, e);
                    }
                }
            }
            Err(e) => {
                self.stats.malformed_frames += 1;
                log::warn!("Dropping frame: {}", e);
            }
        }

        if self.settings.echo_frames && !bytes.is_empty() {
            let mut rx = [0u8; 4];
            let n = bytes.len().min(4);
            rx[..n].copy_from_slice(&bytes[..n]);
            responses.push(ResponseFrame::Echo(rx));
        }

        responses
    }

    fn execute(&mut self, frame: &CommandFrame) -> Result<Option<ResponseFrame>, DispatchError> {
        let action = lookup(frame.opcode)
            .ok_or(DispatchError::Codec(CodecError::UnrecognizedOpcode(frame.opcode)))?;

        let response = match action {
            Action::SetRelay(relay) => {
                let on = frame.param != 0;
                self.actuator.set_relay(relay, on)?;
                match relay {
                    RelayId::One => self.state.relay1 = on,
                    RelayId::Two => self.state.relay2 = on,
                }
                log::info!("Relay {} -> {}", relay.number(), if on { "ON" } else { "OFF" });
                None
            }
            Action::SetDimmer(dimmer) => {
                let value = frame.value.min(DIMMER_MAX);
                if value != frame.value {
                    log::debug!("Dimmer {} value {} clamped to {}", dimmer.number(), frame.value, value);
                }
                self.actuator.set_dimmer(dimmer, value)?;
                match dimmer {
                    DimmerId::One => self.state.dimmer1_value = value,
                    DimmerId::Two => self.state.dimmer2_value = value,
                }
                log::info!("Dimmer {} -> {}", dimmer.number(), value);
                None
            }
            Action::EnableDimmer(dimmer, enabled) => {
                self.actuator.enable_dimmer(dimmer, enabled)?;
                match dimmer {
                    DimmerId::One => self.state.dimmer1_enabled = enabled,
                    DimmerId::Two => self.state.dimmer2_enabled = enabled,
                }
                log::info!("Dimmer {} {}", dimmer.number(), if enabled { "enabled" } else { "disabled" });
                None
            }
            Action::ReportStatus => Some(ResponseFrame::Status(self.state)),
            Action::ReportVersion => Some(ResponseFrame::Version(self.settings.version)),
        };

        self.stats.commands_applied += 1;
        Ok(response)
    }

    /// Periodic timer hook; every `status_push_ticks` ticks yields an unsolicited status frame.
    pub fn on_timer_tick(&mut self) -> Option<ResponseFrame> {
        if self.settings.status_push_ticks == 0 {
            return None;
        }

        self.tick_count += 1;
        if self.tick_count >= self.settings.status_push_ticks {
            self.tick_count = 0;
            self.stats.status_pushes += 1;
            Some(ResponseFrame::Status(self.state))
        } else {
            None
        }
    }

    /// Human-readable lines sent once after power-up.
    pub fn boot_greeting(&self) -> String {
        let on_off = |on: bool| if on { "ON" } else { "OFF" };
        format!(
            "\r\n=== PowerPack R2M1 {} Started ===\r\n\
             Initializing PowerPack...\r\n\
             PowerPack initialized successfully\r\n\
             Relay 1: {}, Relay 2: {}\r\n\
             Ready for commands!\r\n",
            self.settings.version,
            on_off(self.state.relay1),
            on_off(self.state.relay2),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::firmware::actuator::{ActuatorCall, RecordingActuator};
    use crate::serial::FirmwareVersion;

    fn dispatcher() -> Dispatcher<RecordingActuator> {
        Dispatcher::new(RecordingActuator::new(), DeviceSettings::default())
    }

    #[test]
    fn test_table_covers_every_opcode() {
        for op in Opcode::ALL {
            assert!(lookup(op.as_byte()).is_some(), "{} missing from table", op.name());
        }
        assert!(lookup(0x00).is_none());
        assert!(lookup(0xFF).is_none());
    }

    #[test]
    fn test_boot_initialises_outputs() {
        let d = dispatcher();
        assert_eq!(*d.state(), DeviceState::default());
        assert_eq!(
            d.actuator().calls(),
            &[
                ActuatorCall::Relay(RelayId::One, false),
                ActuatorCall::Relay(RelayId::Two, false),
                ActuatorCall::DimmerEnable(DimmerId::One, false),
                ActuatorCall::DimmerEnable(DimmerId::Two, false),
            ]
        );
    }

    #[test]
    fn test_relay_param_is_boolean() {
        let mut d = dispatcher();
        assert!(d.handle_frame(&[0x02, 0x07, 0x00, 0x00]).is_empty());
        assert!(d.state().relay2);
        d.handle_frame(&[0x02, 0x00]);
        assert!(!d.state().relay2);
        assert_eq!(d.actuator().last_call(), Some(ActuatorCall::Relay(RelayId::Two, false)));
    }

    #[test]
    fn test_dimmer_value_clamps() {
        let mut d = dispatcher();
        d.handle_frame(&[0x04, 0x00, 0xFF, 0xFF]);
        assert_eq!(d.state().dimmer2_value, 4095);
        assert_eq!(d.actuator().last_call(), Some(ActuatorCall::Dimmer(DimmerId::Two, 4095)));
    }

    #[test]
    fn test_enable_disable_dimmers() {
        let mut d = dispatcher();
        d.handle_frame(&[0x06, 0x00]);
        d.handle_frame(&[0x07, 0x00]);
        assert!(d.state().dimmer1_enabled && d.state().dimmer2_enabled);
        d.handle_frame(&[0x08, 0x00]);
        assert!(!d.state().dimmer1_enabled);
        assert!(d.state().dimmer2_enabled);
        d.handle_frame(&[0x09, 0x00]);
        assert!(!d.state().dimmer2_enabled);
    }

    #[test]
    fn test_short_frame_dropped() {
        let mut d = dispatcher();
        assert!(d.handle_frame(&[0x05]).is_empty());
        assert_eq!(d.stats().malformed_frames, 1);
    }

    #[test]
    fn test_bus_failure_keeps_previous_value() {
        let mut d = dispatcher();
        d.handle_frame(&[0x03, 0x00, 0x01, 0x00]);
        assert_eq!(d.state().dimmer1_value, 256);

        d.actuator_mut().set_bus_failure(true);
        assert!(d.handle_frame(&[0x03, 0x00, 0x02, 0x00]).is_empty());
        assert_eq!(d.state().dimmer1_value, 256);
        assert_eq!(d.stats().actuator_failures, 1);

        // Dispatcher keeps serving after the failure
        d.handle_frame(&[0x01, 0x01]);
        assert!(d.state().relay1);
    }

    #[test]
    fn test_status_push_every_five_ticks() {
        let mut d = dispatcher();
        let pushes: Vec<_> = (0..12).map(|_| d.on_timer_tick()).collect();
        let pushed_at: Vec<usize> = pushes
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_some())
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(pushed_at, vec![5, 10]);
    }

    #[test]
    fn test_push_disabled_with_zero_ticks() {
        let settings = DeviceSettings { status_push_ticks: 0, ..Default::default() };
        let mut d = Dispatcher::new(RecordingActuator::new(), settings);
        assert!((0..20).all(|_| d.on_timer_tick().is_none()));
    }

    #[test]
    fn test_echo_frames_when_enabled() {
        let settings = DeviceSettings { echo_frames: true, ..Default::default() };
        let mut d = Dispatcher::new(RecordingActuator::new(), settings);

        let out = d.handle_frame(&[0x05, 0x00, 0x00, 0x00, 0, 0, 0, 0]);
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], ResponseFrame::Status(_)));
        assert_eq!(out[1], ResponseFrame::Echo([0x05, 0, 0, 0]));

        // Unknown opcodes are still acknowledged by the debug echo
        let out = d.handle_frame(&[0xFF, 0x00]);
        assert_eq!(out, vec![ResponseFrame::Echo([0xFF, 0, 0, 0])]);
    }

    #[test]
    fn test_greeting_mentions_version() {
        let settings = DeviceSettings { version: FirmwareVersion::new(3, 1, 4), ..Default::default() };
        let d = Dispatcher::new(RecordingActuator::new(), settings);
        let greeting = d.boot_greeting();
        assert!(greeting.contains("v3.1.4"));
        assert!(greeting.contains("Ready for commands!"));
    }
}
