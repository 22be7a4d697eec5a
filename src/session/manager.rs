use std::sync::Arc;
use chrono::Utc;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::serial::codec::{decode_responses, ResponseFrame};
use crate::serial::protocol::percent_to_dac;
use crate::serial::{Command, Connector, DeviceState, DimmerId, FirmwareVersion, RelayId, SerialError, Transport};
use super::monitor::LivenessMonitor;
use super::{ConnectReport, ConnectionState, Result, SessionError, SessionEvent, SessionSnapshot, SessionState};

/// Oldest firmware whose frame layout this host understands
pub const MIN_SUPPORTED_FIRMWARE: semver::Version = semver::Version::new(2, 0, 0);

/// Upper bound on boot greeting bytes collected during connect
const MAX_BOOT_BYTES: usize = 4096;
const EVENT_CAPACITY: usize = 64;

/// State shared between the session manager and its polling task.
pub(crate) struct SessionCore {
    pub(crate) config: SessionConfig,
    /// Held for exactly one write + read exchange
    link: Mutex<Option<Box<dyn Transport>>>,
    state: RwLock<Option<SessionState>>,
    state_tx: watch::Sender<ConnectionState>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl SessionCore {
    fn new(config: SessionConfig) -> Self {
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        let (events_tx, _events_rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            link: Mutex::new(None),
            state: RwLock::new(None),
            state_tx,
            events_tx,
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events_tx.send(event);
    }

    fn transition(&self, session: &mut SessionState, to: ConnectionState) {
        let from = session.connection_state;
        if from == to {
            return;
        }
        session.connection_state = to;
        self.state_tx.send_replace(to);
        self.emit(SessionEvent::StateChanged { from, to });

        match to {
            ConnectionState::Stale => log::warn!(
                "Device on {} silent for over {:?}, marking session stale",
                session.endpoint,
                self.config.stale_threshold()
            ),
            _ => log::info!("Session {} on {}: {:?} -> {:?}", session.session_id, session.endpoint, from, to),
        }
    }

    /// Tear down session state after a disconnect or failed connect.
    async fn reset(&self) -> bool {
        let mut guard = self.state.write().await;
        match guard.as_mut() {
            Some(session) => {
                self.transition(session, ConnectionState::Disconnected);
                *guard = None;
                true
            }
            None => false,
        }
    }

    async fn close_link(&self) {
        if let Some(mut transport) = self.link.lock().await.take() {
            transport.close();
        }
    }

    /// An I/O failure ends the session; reconnecting is up to the caller.
    async fn fail_link(&self, error: &SerialError) {
        log::error!("Link failure, closing session: {}", error);
        self.emit(SessionEvent::LinkError(error.to_string()));
        self.close_link().await;
        self.reset().await;
    }

    /// Encode, write, then read once. Liveness is only refreshed by a decoded read.
    pub(crate) async fn exchange(&self, command: Command) -> Result<Option<ResponseFrame>> {
        let opcode = command.opcode();
        let bytes = command.to_frame().encode();
        let read_timeout = if opcode.expects_response() {
            self.config.response_timeout()
        } else {
            self.config.ack_window()
        };

        let outcome = {
            let mut link = self.link.lock().await;
            let transport = link.as_mut().ok_or(SessionError::NotConnected)?;
            log::debug!("Sending {} [{}]", opcode.name(), hex::encode(bytes));
            match transport.write(&bytes).await {
                Ok(()) => transport.read(self.config.read_buffer_size, read_timeout).await,
                Err(e) => Err(e),
            }
        };

        match outcome {
            Ok(data) => Ok(self.record_read(&data, command).await),
            Err(SerialError::Timeout) => {
                if opcode.expects_response() {
                    log::debug!("No response to {} within {:?}", opcode.name(), read_timeout);
                }
                Ok(None)
            }
            Err(e) => {
                self.fail_link(&e).await;
                Err(SessionError::Serial(e))
            }
        }
    }

    async fn record_read(&self, data: &[u8], command: Command) -> Option<ResponseFrame> {
        log::debug!("RAW DATA: [{}]", hex::encode(data));

        let mut decoded = Vec::new();
        for result in decode_responses(data) {
            match result {
                Ok(frame) => decoded.push(frame),
                Err(e) => log::debug!("Discarding inbound bytes: {}", e),
            }
        }
        if decoded.is_empty() {
            return None;
        }

        {
            let mut guard = self.state.write().await;
            let session = guard.as_mut()?;
            let now = Instant::now();
            session.last_communication = Some(now);
            session.last_seen = Some(Utc::now());

            for frame in &decoded {
                match *frame {
                    ResponseFrame::Status(state) => {
                        session.device_state_mirror = Some(state);
                        self.emit(SessionEvent::MirrorUpdated(state));
                    }
                    ResponseFrame::Version(version) => {
                        session.firmware_version = Some(version);
                        self.emit(SessionEvent::VersionReported(version));
                    }
                    ResponseFrame::Echo(rx) => log::debug!("Echo of [{}]", hex::encode(rx)),
                }
            }

            if session.connection_state == ConnectionState::Stale {
                self.transition(session, ConnectionState::Connected);
            }
        }

        let opcode = command.opcode();
        decoded
            .iter()
            .find(|f| f.answers(opcode))
            .or_else(|| decoded.first())
            .copied()
    }

    /// Apply the liveness predicate and move between Connected and Stale.
    pub(crate) async fn refresh_liveness(&self) -> ConnectionState {
        let mut guard = self.state.write().await;
        let Some(session) = guard.as_mut() else {
            return ConnectionState::Disconnected;
        };

        let active = session.is_active(Instant::now(), self.config.stale_threshold());
        match (session.connection_state, active) {
            (ConnectionState::Connected, false) => self.transition(session, ConnectionState::Stale),
            (ConnectionState::Stale, true) => self.transition(session, ConnectionState::Connected),
            _ => {}
        }
        session.connection_state
    }

    pub(crate) fn emit_missed_heartbeat(&self) {
        self.emit(SessionEvent::HeartbeatMissed);
    }
}

/// Owns the connection lifecycle to one PowerPack board.
///
/// User commands and the background status poll share one transport; the
/// transport lock is held for a single exchange at a time, so frames from the
/// two paths never interleave.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    core: Arc<SessionCore>,
    /// Also serializes connect/disconnect
    monitor: Mutex<Option<LivenessMonitor>>,
}

impl SessionManager {
    pub fn new(connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        Self {
            connector,
            core: Arc::new(SessionCore::new(config)),
            monitor: Mutex::new(None),
        }
    }

    /// Open the endpoint, look for a boot greeting and start liveness polling.
    ///
    /// A board that stays silent through the stabilization window still
    /// yields a connected session, with `boot_message_observed = false`.
    pub async fn connect(&self, endpoint: &str) -> Result<ConnectReport> {
        self.core.config.validate()?;
        let mut monitor = self.monitor.lock().await;

        {
            let mut guard = self.core.state.write().await;
            if guard.is_some() {
                return Err(SessionError::AlreadyConnected);
            }
            let mut session = SessionState::new(endpoint);
            session.connection_state = ConnectionState::Disconnected;
            self.core.transition(&mut session, ConnectionState::Connecting);
            *guard = Some(session);
        }

        log::info!("=== Connection attempt to {} ===", endpoint);
        let mut transport = match self.connector.open(endpoint).await {
            Ok(transport) => transport,
            Err(e) => {
                log::error!("Connection to {} failed: {}", endpoint, e);
                self.core.reset().await;
                return Err(SessionError::Serial(e));
            }
        };

        let boot = match self.collect_boot_output(transport.as_mut()).await {
            Ok(boot) => boot,
            Err(e) => {
                log::error!("Connection to {} failed during stabilization: {}", endpoint, e);
                transport.close();
                self.core.reset().await;
                return Err(SessionError::Serial(e));
            }
        };

        let boot_message_observed = !boot.is_empty();
        if boot_message_observed {
            log::info!("Received boot data ({} bytes): {:?}", boot.len(), String::from_utf8_lossy(&boot));
            self.core.emit(SessionEvent::BootMessage { bytes: boot.len() });
        } else {
            log::warn!("No boot message received from device on {}", endpoint);
            self.core.emit(SessionEvent::NoBootMessage);
        }

        *self.core.link.lock().await = Some(transport);

        let session_id = {
            let mut guard = self.core.state.write().await;
            let session = guard.as_mut().ok_or(SessionError::NotConnected)?;
            session.boot_message_observed = boot_message_observed;
            session.last_communication = Some(Instant::now());
            session.connected_at = Some(Utc::now());
            self.core.transition(session, ConnectionState::Connected);
            session.session_id
        };

        self.core.exchange(Command::GetVersion).await?;
        let firmware_version = self.firmware_version().await;
        match firmware_version {
            Some(version) if version.to_semver() < MIN_SUPPORTED_FIRMWARE => log::warn!(
                "Firmware {} is older than the minimum supported v{}",
                version,
                MIN_SUPPORTED_FIRMWARE
            ),
            Some(version) => log::info!("Firmware version: {}", version),
            None => log::warn!("Device did not report a firmware version"),
        }

        *monitor = Some(LivenessMonitor::start(self.core.clone()));
        log::info!("=== Connection established to {} ===", endpoint);

        Ok(ConnectReport {
            session_id,
            endpoint: endpoint.to_string(),
            boot_message_observed,
            boot_bytes: boot.len(),
            firmware_version,
        })
    }

    /// Clear stale input, wait out the board's boot sequence, then drain whatever it printed.
    async fn collect_boot_output(&self, transport: &mut dyn Transport) -> std::result::Result<Vec<u8>, SerialError> {
        let config = &self.core.config;
        transport.clear_input().await?;

        log::info!("Waiting {:?} for device to stabilize...", config.stabilization());
        tokio::time::sleep(config.stabilization()).await;

        let mut boot = Vec::new();
        while boot.len() < MAX_BOOT_BYTES {
            match transport.read(config.read_buffer_size, config.boot_read_timeout()).await {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(chunk) => boot.extend_from_slice(&chunk),
                Err(SerialError::Timeout) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(boot)
    }

    /// Stop polling, close the transport and drop the session state.
    pub async fn disconnect(&self) -> Result<()> {
        let mut monitor = self.monitor.lock().await;
        let had_monitor = match monitor.take() {
            Some(m) => {
                m.stop().await;
                true
            }
            None => false,
        };

        self.core.close_link().await;
        let had_session = self.core.reset().await;

        if had_session || had_monitor {
            log::info!("Disconnected from device");
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// Send one command through the shared exchange path.
    ///
    /// Returns `Ok(None)` when nothing decodable came back; that is a missed
    /// reply, not an error.
    pub async fn send_command(&self, command: Command) -> Result<Option<ResponseFrame>> {
        let response = self.core.exchange(command).await?;
        log::info!("Sent command: {:?}", command);
        Ok(response)
    }

    pub async fn set_relay(&self, relay: RelayId, on: bool) -> Result<()> {
        self.send_command(Command::SetRelay { relay, on }).await.map(|_| ())
    }

    /// Set a dimmer by raw DAC code; the firmware saturates codes above 4095.
    pub async fn set_dimmer(&self, dimmer: DimmerId, value: u16) -> Result<()> {
        self.send_command(Command::SetDimmer { dimmer, value }).await.map(|_| ())
    }

    pub async fn set_dimmer_percent(&self, dimmer: DimmerId, percentage: f32) -> Result<u16> {
        let value = percent_to_dac(percentage).map_err(|e| SessionError::InvalidArgument(e.to_string()))?;
        self.set_dimmer(dimmer, value).await?;
        Ok(value)
    }

    pub async fn enable_dimmer(&self, dimmer: DimmerId, enabled: bool) -> Result<()> {
        self.send_command(Command::EnableDimmer { dimmer, enabled }).await.map(|_| ())
    }

    /// Ask for a status frame; `None` when the board did not answer in time.
    pub async fn request_status(&self) -> Result<Option<DeviceState>> {
        match self.send_command(Command::GetStatus).await? {
            Some(ResponseFrame::Status(state)) => Ok(Some(state)),
            _ => Ok(None),
        }
    }

    pub async fn request_version(&self) -> Result<Option<FirmwareVersion>> {
        match self.send_command(Command::GetVersion).await? {
            Some(ResponseFrame::Version(version)) => Ok(Some(version)),
            _ => Ok(None),
        }
    }

    /// Relays off, dimmer outputs disabled and set to zero.
    pub async fn all_off(&self) -> Result<()> {
        let commands = [
            Command::SetRelay { relay: RelayId::One, on: false },
            Command::SetRelay { relay: RelayId::Two, on: false },
            Command::EnableDimmer { dimmer: DimmerId::One, enabled: false },
            Command::EnableDimmer { dimmer: DimmerId::Two, enabled: false },
            Command::SetDimmer { dimmer: DimmerId::One, value: 0 },
            Command::SetDimmer { dimmer: DimmerId::Two, value: 0 },
        ];
        for command in commands {
            self.send_command(command).await?;
        }
        Ok(())
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.core.state_tx.borrow()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.core.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.events_tx.subscribe()
    }

    /// Liveness predicate evaluated now, without waiting for the next poll.
    pub async fn is_active(&self) -> bool {
        let guard = self.core.state.read().await;
        guard
            .as_ref()
            .map(|s| s.connection_state.is_open() && s.is_active(Instant::now(), self.core.config.stale_threshold()))
            .unwrap_or(false)
    }

    /// Last mirrored device state; never synthesized while stale.
    pub async fn device_state(&self) -> Option<DeviceState> {
        let guard = self.core.state.read().await;
        guard.as_ref().and_then(|s| s.device_state_mirror)
    }

    pub async fn firmware_version(&self) -> Option<FirmwareVersion> {
        let guard = self.core.state.read().await;
        guard.as_ref().and_then(|s| s.firmware_version)
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let guard = self.core.state.read().await;
        match guard.as_ref() {
            Some(session) => session.snapshot(Instant::now(), self.core.config.stale_threshold()),
            None => SessionSnapshot::disconnected(),
        }
    }
}
