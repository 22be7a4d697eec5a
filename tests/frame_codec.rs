use powerpack_lib::serial::codec::{
    decode_command, decode_response, decode_responses, encode_command, CodecError, CommandFrame, ResponseFrame,
    COMMAND_FRAME_SIZE,
};
use powerpack_lib::serial::{Command, DeviceState, DimmerId, FirmwareVersion, Opcode, RelayId};

#[test]
fn test_typed_commands_encode_to_wire_bytes() {
    let cases: [(Command, [u8; COMMAND_FRAME_SIZE]); 6] = [
        (Command::SetRelay { relay: RelayId::One, on: true }, [0x01, 0x01, 0, 0, 0, 0, 0, 0]),
        (Command::SetRelay { relay: RelayId::Two, on: false }, [0x02, 0x00, 0, 0, 0, 0, 0, 0]),
        (Command::SetDimmer { dimmer: DimmerId::Two, value: 0x0ABC }, [0x04, 0x00, 0x0A, 0xBC, 0, 0, 0, 0]),
        (Command::EnableDimmer { dimmer: DimmerId::Two, enabled: false }, [0x09, 0x00, 0, 0, 0, 0, 0, 0]),
        (Command::GetStatus, [0x05, 0, 0, 0, 0, 0, 0, 0]),
        (Command::GetVersion, [0x0A, 0, 0, 0, 0, 0, 0, 0]),
    ];

    for (command, expected) in cases {
        assert_eq!(command.to_frame().encode(), expected, "{:?}", command);
    }
}

#[test]
fn test_device_reads_what_host_writes() {
    let bytes = encode_command(Opcode::SetDimmer1.as_byte(), 0, 2047);
    let frame = decode_command(&bytes).unwrap();
    assert_eq!(frame.known_opcode(), Some(Opcode::SetDimmer1));
    assert_eq!(frame.value, 2047);
}

#[test]
fn test_every_command_triple_survives_the_wire() {
    let params = [0x00u8, 0x01, 0x7F, 0xFF];
    let values = [0x0000u16, 0x0001, 0x00FF, 0x0100, 4095, 4096, 0xFFFF];

    for opcode in 0..=u8::MAX {
        for &param in &params {
            for &value in &values {
                let bytes = encode_command(opcode, param, value);
                assert_eq!(
                    decode_command(&bytes),
                    Ok(CommandFrame::new(opcode, param, value)),
                    "opcode 0x{:02X} param {} value {}",
                    opcode,
                    param,
                    value
                );
            }
        }
    }
}

#[test]
fn test_status_frame_wire_layout() {
    let state = DeviceState {
        relay1: false,
        relay2: true,
        dimmer1_value: 0x0123,
        dimmer2_value: 0x0FFF,
        dimmer1_enabled: true,
        dimmer2_enabled: true,
    };
    let bytes = ResponseFrame::Status(state).encode();
    assert_eq!(bytes, [0x05, 0x00, 0x01, 0x01, 0x23, 0x0F, 0xFF, 0x03]);
    assert_eq!(decode_response(&bytes), Ok(ResponseFrame::Status(state)));
}

#[test]
fn test_version_frame_wire_layout() {
    let bytes = ResponseFrame::Version(FirmwareVersion::new(2, 0, 1)).encode();
    assert_eq!(bytes, [0x0A, 0x02, 0x00, 0x01, 0, 0, 0, 0]);
}

#[test]
fn test_status_followed_by_echo_in_one_read() {
    let mut read = vec![0x05, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
    read.extend_from_slice(&[0xEE, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

    let frames: Vec<_> = decode_responses(&read).into_iter().collect::<Result<_, _>>().unwrap();
    assert_eq!(frames.len(), 2);
    assert!(matches!(frames[0], ResponseFrame::Status(s) if s.relay1 && !s.relay2));
    assert_eq!(frames[1], ResponseFrame::Echo([0x05, 0, 0, 0]));
    assert!(frames[0].answers(Opcode::GetStatus));
    assert!(!frames[1].answers(Opcode::GetStatus));
}

#[test]
fn test_boot_text_is_not_a_frame() {
    let results = decode_responses(b"Ready for commands!\r\n");
    assert!(results.iter().all(|r| r.is_err()));
    assert!(matches!(results[0], Err(CodecError::UnrecognizedResponse(b'R'))));
}
