use std::fmt;
use serde::{Deserialize, Serialize};

use super::codec::CommandFrame;

/// Highest value accepted by the 12-bit dimmer DAC.
pub const DIMMER_MAX: u16 = 4095;

/// Command opcodes understood by the PowerPack firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    SetRelay1 = 0x01,
    SetRelay2 = 0x02,
    SetDimmer1 = 0x03,
    SetDimmer2 = 0x04,
    GetStatus = 0x05,
    EnableDimmer1 = 0x06,
    EnableDimmer2 = 0x07,
    DisableDimmer1 = 0x08,
    DisableDimmer2 = 0x09,
    GetVersion = 0x0A,
}

impl Opcode {
    pub const ALL: [Opcode; 10] = [
        Opcode::SetRelay1,
        Opcode::SetRelay2,
        Opcode::SetDimmer1,
        Opcode::SetDimmer2,
        Opcode::GetStatus,
        Opcode::EnableDimmer1,
        Opcode::EnableDimmer2,
        Opcode::DisableDimmer1,
        Opcode::DisableDimmer2,
        Opcode::GetVersion,
    ];

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|op| *op as u8 == byte)
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether the firmware answers this opcode with a frame of its own.
    pub fn expects_response(self) -> bool {
        matches!(self, Opcode::GetStatus | Opcode::GetVersion)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::SetRelay1 => "SET_RELAY1",
            Opcode::SetRelay2 => "SET_RELAY2",
            Opcode::SetDimmer1 => "SET_DIMMER1",
            Opcode::SetDimmer2 => "SET_DIMMER2",
            Opcode::GetStatus => "GET_STATUS",
            Opcode::EnableDimmer1 => "ENABLE_DIMMER1",
            Opcode::EnableDimmer2 => "ENABLE_DIMMER2",
            Opcode::DisableDimmer1 => "DISABLE_DIMMER1",
            Opcode::DisableDimmer2 => "DISABLE_DIMMER2",
            Opcode::GetVersion => "GET_VERSION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelayId {
    One,
    Two,
}

impl RelayId {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(RelayId::One),
            2 => Some(RelayId::Two),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            RelayId::One => 1,
            RelayId::Two => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DimmerId {
    One,
    Two,
}

impl DimmerId {
    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(DimmerId::One),
            2 => Some(DimmerId::Two),
            _ => None,
        }
    }

    pub fn number(self) -> u8 {
        match self {
            DimmerId::One => 1,
            DimmerId::Two => 2,
        }
    }
}

/// Relay and dimmer state as owned by the device.
///
/// The host only ever holds a mirror of this record, rebuilt from each
/// decoded status frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub relay1: bool,
    pub relay2: bool,
    pub dimmer1_value: u16,
    pub dimmer2_value: u16,
    pub dimmer1_enabled: bool,
    pub dimmer2_enabled: bool,
}

impl DeviceState {
    pub fn relay(&self, relay: RelayId) -> bool {
        match relay {
            RelayId::One => self.relay1,
            RelayId::Two => self.relay2,
        }
    }

    pub fn dimmer_value(&self, dimmer: DimmerId) -> u16 {
        match dimmer {
            DimmerId::One => self.dimmer1_value,
            DimmerId::Two => self.dimmer2_value,
        }
    }

    pub fn dimmer_enabled(&self, dimmer: DimmerId) -> bool {
        match dimmer {
            DimmerId::One => self.dimmer1_enabled,
            DimmerId::Two => self.dimmer2_enabled,
        }
    }

    /// Dimmer enable bits as carried in byte 7 of a status frame.
    pub fn enable_flags(&self) -> u8 {
        ((self.dimmer1_enabled as u8) << 1) | (self.dimmer2_enabled as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl FirmwareVersion {
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self { major, minor, patch }
    }

    pub fn to_semver(self) -> semver::Version {
        semver::Version::new(self.major as u64, self.minor as u64, self.patch as u64)
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Typed host command, lowered to a [`CommandFrame`] before it goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    SetRelay { relay: RelayId, on: bool },
    SetDimmer { dimmer: DimmerId, value: u16 },
    EnableDimmer { dimmer: DimmerId, enabled: bool },
    GetStatus,
    GetVersion,
}

impl Command {
    pub fn opcode(&self) -> Opcode {
        match *self {
            Command::SetRelay { relay: RelayId::One, .. } => Opcode::SetRelay1,
            Command::SetRelay { relay: RelayId::Two, .. } => Opcode::SetRelay2,
            Command::SetDimmer { dimmer: DimmerId::One, .. } => Opcode::SetDimmer1,
            Command::SetDimmer { dimmer: DimmerId::Two, .. } => Opcode::SetDimmer2,
            Command::EnableDimmer { dimmer: DimmerId::One, enabled: true } => Opcode::EnableDimmer1,
            Command::EnableDimmer { dimmer: DimmerId::Two, enabled: true } => Opcode::EnableDimmer2,
            Command::EnableDimmer { dimmer: DimmerId::One, enabled: false } => Opcode::DisableDimmer1,
            Command::EnableDimmer { dimmer: DimmerId::Two, enabled: false } => Opcode::DisableDimmer2,
            Command::GetStatus => Opcode::GetStatus,
            Command::GetVersion => Opcode::GetVersion,
        }
    }

    pub fn to_frame(&self) -> CommandFrame {
        let (param, value) = match *self {
            Command::SetRelay { on, .. } => (on as u8, 0),
            Command::SetDimmer { value, .. } => (0, value),
            _ => (0, 0),
        };
        CommandFrame::new(self.opcode().as_byte(), param, value)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("Percentage must be 0-100, got {0}")]
pub struct PercentOutOfRange(pub f32);

/// Convert a 0-100 % output level to a 12-bit DAC code.
pub fn percent_to_dac(percentage: f32) -> Result<u16, PercentOutOfRange> {
    if !(0.0..=100.0).contains(&percentage) {
        return Err(PercentOutOfRange(percentage));
    }
    Ok(((percentage / 100.0) * DIMMER_MAX as f32) as u16)
}

pub fn dac_to_percent(value: u16) -> f32 {
    (value.min(DIMMER_MAX) as f32 / DIMMER_MAX as f32) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_lookup() {
        assert_eq!(Opcode::from_byte(0x05), Some(Opcode::GetStatus));
        assert_eq!(Opcode::from_byte(0x0A), Some(Opcode::GetVersion));
        assert_eq!(Opcode::from_byte(0x00), None);
        assert_eq!(Opcode::from_byte(0xFF), None);
    }

    #[test]
    fn test_command_lowering() {
        let frame = Command::EnableDimmer { dimmer: DimmerId::Two, enabled: false }.to_frame();
        assert_eq!(frame.opcode, 0x09);

        let frame = Command::SetRelay { relay: RelayId::One, on: true }.to_frame();
        assert_eq!((frame.opcode, frame.param, frame.value), (0x01, 1, 0));

        let frame = Command::SetDimmer { dimmer: DimmerId::Two, value: 2048 }.to_frame();
        assert_eq!((frame.opcode, frame.param, frame.value), (0x04, 0, 2048));
    }

    #[test]
    fn test_percent_conversion() {
        assert_eq!(percent_to_dac(0.0), Ok(0));
        assert_eq!(percent_to_dac(100.0), Ok(4095));
        assert_eq!(percent_to_dac(50.0), Ok(2047));
        assert!(percent_to_dac(100.5).is_err());
        assert!(percent_to_dac(-1.0).is_err());
        assert!((dac_to_percent(4095) - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_enable_flags_bit_layout() {
        let state = DeviceState { dimmer1_enabled: true, ..Default::default() };
        assert_eq!(state.enable_flags(), 0b10);
        let state = DeviceState { dimmer2_enabled: true, ..Default::default() };
        assert_eq!(state.enable_flags(), 0b01);
    }

    #[test]
    fn test_version_display() {
        let v = FirmwareVersion::new(2, 0, 1);
        assert_eq!(v.to_string(), "v2.0.1");
        assert!(v.to_semver() >= semver::Version::new(2, 0, 0));
    }
}
