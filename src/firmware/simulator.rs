use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::actuator::RecordingActuator;
use super::dispatcher::{DispatchStats, Dispatcher};
use super::DeviceSettings;
use crate::serial::codec::{ResponseFrame, MAX_TRANSFER_SIZE};
use crate::serial::{Connector, DeviceState, Result, SerialError, Transport};

const POLL_STEP: Duration = Duration::from_millis(5);
const DEFAULT_BOOT_DELAY: Duration = Duration::from_millis(2000);

struct DeviceCore {
    dispatcher: Dispatcher<RecordingActuator>,
    outbound: VecDeque<Vec<u8>>,
    present: bool,
    responsive: bool,
    fail_writes: bool,
    boot_delay: Duration,
    greeting_due: Option<Instant>,
}

impl DeviceCore {
    fn emit(&mut self, frame: ResponseFrame) {
        if self.responsive {
            self.outbound.push_back(frame.encode().to_vec());
        }
    }

    fn flush_due_greeting(&mut self) {
        if let Some(due) = self.greeting_due {
            if Instant::now() >= due {
                self.greeting_due = None;
                if self.responsive {
                    let greeting = self.dispatcher.boot_greeting();
                    self.outbound.push_back(greeting.into_bytes());
                }
            }
        }
    }
}

/// In-process PowerPack board.
///
/// Clones share one device. Every link opened through [`Connector::open`]
/// talks to the same dispatcher, which sits behind a single lock so the
/// status timer and the command path each complete a whole frame before the
/// other runs.
#[derive(Clone)]
pub struct VirtualDevice {
    core: Arc<Mutex<DeviceCore>>,
}

impl VirtualDevice {
    pub fn new(settings: DeviceSettings) -> Self {
        let dispatcher = Dispatcher::new(RecordingActuator::new(), settings);
        Self {
            core: Arc::new(Mutex::new(DeviceCore {
                dispatcher,
                outbound: VecDeque::new(),
                present: true,
                responsive: true,
                fail_writes: false,
                boot_delay: DEFAULT_BOOT_DELAY,
                greeting_due: None,
            })),
        }
    }

    /// Delay between a link opening and the boot greeting appearing on it.
    pub fn with_boot_delay(self, delay: Duration) -> Self {
        self.core().boot_delay = delay;
        self
    }

    fn core(&self) -> MutexGuard<'_, DeviceCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unplug or replug the board; opening fails while absent.
    pub fn set_present(&self, present: bool) {
        self.core().present = present;
    }

    /// A non-responsive board swallows commands and emits nothing.
    pub fn set_responsive(&self, responsive: bool) {
        let mut core = self.core();
        core.responsive = responsive;
        if !responsive {
            core.outbound.clear();
        }
    }

    /// Make writes fail with a broken-pipe I/O error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.core().fail_writes = fail;
    }

    pub fn set_bus_failure(&self, fail: bool) {
        self.core().dispatcher.actuator_mut().set_bus_failure(fail);
    }

    /// Advance the periodic status timer by one tick.
    pub fn tick(&self) -> Option<ResponseFrame> {
        let mut core = self.core();
        let frame = core.dispatcher.on_timer_tick()?;
        log::debug!("Timer status push: {:?}", frame);
        core.emit(frame);
        Some(frame)
    }

    /// Drive [`tick`](Self::tick) from a tokio interval until the handle is aborted.
    pub fn spawn_status_timer(&self, period: Duration) -> JoinHandle<()> {
        let device = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                device.tick();
            }
        })
    }

    /// Queue raw bytes on the device's transmit side.
    pub fn inject(&self, bytes: &[u8]) {
        self.core().outbound.push_back(bytes.to_vec());
    }

    pub fn state(&self) -> DeviceState {
        *self.core().dispatcher.state()
    }

    pub fn stats(&self) -> DispatchStats {
        self.core().dispatcher.stats().clone()
    }

    pub fn pending_output(&self) -> usize {
        self.core().outbound.len()
    }
}

impl Default for VirtualDevice {
    fn default() -> Self {
        Self::new(DeviceSettings::default())
    }
}

#[async_trait::async_trait]
impl Connector for VirtualDevice {
    async fn open(&self, endpoint: &str) -> Result<Box<dyn Transport>> {
        let mut core = self.core();
        if !core.present {
            return Err(SerialError::ConnectionFailed(format!("{}: device not present", endpoint)));
        }

        if core.dispatcher.settings().boot_greeting {
            core.greeting_due = Some(Instant::now() + core.boot_delay);
        }
        log::debug!("Virtual device link opened on '{}'", endpoint);

        Ok(Box::new(VirtualLink {
            core: self.core.clone(),
            open: true,
        }))
    }
}

struct VirtualLink {
    core: Arc<Mutex<DeviceCore>>,
    open: bool,
}

impl VirtualLink {
    fn core(&self) -> MutexGuard<'_, DeviceCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl Transport for VirtualLink {
    async fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        if !self.open {
            return Err(SerialError::NotConnected);
        }

        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut core = self.core();
                core.flush_due_greeting();
                if let Some(mut chunk) = core.outbound.pop_front() {
                    if chunk.len() > max_bytes {
                        let rest = chunk.split_off(max_bytes);
                        core.outbound.push_front(rest);
                        return Ok(chunk);
                    }
                    // Queued frames coalesce into one read, like a CDC receive buffer
                    while core.outbound.front().is_some_and(|next| chunk.len() + next.len() <= max_bytes) {
                        if let Some(next) = core.outbound.pop_front() {
                            chunk.extend_from_slice(&next);
                        }
                    }
                    return Ok(chunk);
                }
            }

            if Instant::now() >= deadline {
                return Err(SerialError::Timeout);
            }
            tokio::time::sleep(POLL_STEP).await;
        }
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(SerialError::NotConnected);
        }

        let mut core = self.core();
        if core.fail_writes || !core.present {
            return Err(SerialError::IoError(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "virtual device write failed",
            )));
        }

        if !core.responsive {
            return Ok(());
        }

        for transfer in data.chunks(MAX_TRANSFER_SIZE) {
            let responses = core.dispatcher.handle_frame(transfer);
            for frame in responses {
                core.emit(frame);
            }
        }
        Ok(())
    }

    async fn clear_input(&mut self) -> Result<()> {
        let mut core = self.core();
        core.flush_due_greeting();
        core.outbound.clear();
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }
}
