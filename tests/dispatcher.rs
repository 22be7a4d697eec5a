use powerpack_lib::firmware::{ActuatorCall, DeviceSettings, Dispatcher, RecordingActuator};
use powerpack_lib::serial::{DeviceState, DimmerId};

fn dispatcher() -> Dispatcher<RecordingActuator> {
    Dispatcher::new(RecordingActuator::new(), DeviceSettings::default())
}

fn status_bytes(d: &mut Dispatcher<RecordingActuator>) -> [u8; 8] {
    let responses = d.handle_frame(&[0x05, 0x00, 0x00, 0x00]);
    assert_eq!(responses.len(), 1);
    responses[0].encode()
}

#[test]
fn test_relay_on_then_status() {
    let mut d = dispatcher();
    assert!(d.handle_frame(&[0x01, 0x01, 0x00, 0x00]).is_empty());
    assert_eq!(status_bytes(&mut d), [0x05, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn test_dimmer_value_saturates() {
    let mut d = dispatcher();
    d.handle_frame(&[0x03, 0x00, 0x10, 0x00]);
    assert_eq!(d.state().dimmer1_value, 0x0FFF);
    assert_eq!(status_bytes(&mut d), [0x05, 0x00, 0x00, 0x0F, 0xFF, 0x00, 0x00, 0x00]);
    assert_eq!(d.actuator().last_call(), Some(ActuatorCall::Dimmer(DimmerId::One, 4095)));
}

#[test]
fn test_unknown_opcode_changes_nothing() {
    let mut d = dispatcher();
    let before = *d.state();
    assert!(d.handle_frame(&[0xFF, 0x01, 0x02, 0x03]).is_empty());
    assert_eq!(*d.state(), before);
    assert_eq!(d.stats().unknown_opcodes, 1);
}

#[test]
fn test_version_request() {
    let mut d = dispatcher();
    let responses = d.handle_frame(&[0x0A, 0x00, 0x00, 0x00]);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].encode(), [0x0A, 0x02, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn test_enable_flags_in_status() {
    let mut d = dispatcher();
    d.handle_frame(&[0x06, 0x00]);
    assert_eq!(status_bytes(&mut d)[7], 0x02);

    d.handle_frame(&[0x07, 0x00]);
    assert_eq!(status_bytes(&mut d)[7], 0x03);

    d.handle_frame(&[0x08, 0x00]);
    assert_eq!(status_bytes(&mut d)[7], 0x01);
}

#[test]
fn test_short_frame_is_dropped() {
    let mut d = dispatcher();
    assert!(d.handle_frame(&[0x01]).is_empty());
    assert!(d.handle_frame(&[]).is_empty());
    assert_eq!(*d.state(), DeviceState::default());
    assert_eq!(d.stats().malformed_frames, 2);
}

#[test]
fn test_echo_follows_every_transfer() {
    let settings = DeviceSettings {
        echo_frames: true,
        ..DeviceSettings::default()
    };
    let mut d = Dispatcher::new(RecordingActuator::new(), settings);

    let responses = d.handle_frame(&[0x05, 0x00, 0x00, 0x00]);
    assert_eq!(responses.len(), 2);
    assert_eq!(responses[1].encode(), [0xEE, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

    let responses = d.handle_frame(&[0xFF, 0x01]);
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].encode(), [0xEE, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
}

#[test]
fn test_timer_pushes_status_every_fifth_tick() {
    let mut d = dispatcher();
    d.handle_frame(&[0x02, 0x01]);

    for _ in 0..4 {
        assert!(d.on_timer_tick().is_none());
    }
    let pushed = d.on_timer_tick().unwrap();
    assert_eq!(pushed.encode(), [0x05, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]);
    assert!(d.on_timer_tick().is_none());
}

#[test]
fn test_boot_greeting_lines() {
    let d = dispatcher();
    let greeting = d.boot_greeting();
    assert!(greeting.starts_with("\r\n=== PowerPack R2M1 v2.0.1 Started ===\r\n"));
    assert!(greeting.contains("Relay 1: OFF, Relay 2: OFF"));
    assert!(greeting.ends_with("Ready for commands!\r\n"));
}
