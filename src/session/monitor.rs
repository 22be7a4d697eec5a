use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration, Instant, MissedTickBehavior};

use crate::serial::Command;
use super::manager::SessionCore;
use super::{ConnectionState, SessionError};

const STOP_GRACE: Duration = Duration::from_secs(2);

/// Background GET_STATUS heartbeat for one session
pub struct LivenessMonitor {
    /// Task handle for the polling loop
    task_handle: tokio::task::JoinHandle<()>,
    /// Channel to signal stop
    stop_tx: mpsc::Sender<()>,
}

impl LivenessMonitor {
    pub(crate) fn start(core: Arc<SessionCore>) -> Self {
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task_handle = tokio::spawn(async move {
            Self::polling_loop(core, stop_rx).await;
        });

        Self { task_handle, stop_tx }
    }

    /// Signal the loop and wait for it; an in-flight read ends within the
    /// response timeout, after which the task is aborted.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(()).await;

        let mut handle = self.task_handle;
        if timeout(STOP_GRACE, &mut handle).await.is_err() {
            log::warn!("Liveness monitor did not stop within {:?}, aborting", STOP_GRACE);
            handle.abort();
        }
    }

    async fn polling_loop(core: Arc<SessionCore>, mut stop_rx: mpsc::Receiver<()>) {
        let period = core.config.poll_interval();
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut answered = 0u64;
        let mut missed = 0u64;
        log::info!("=== Status monitor started ({:?} interval) ===", period);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    log::debug!("Received stop signal for status monitor");
                    break;
                }

                _ = interval.tick() => {
                    match core.exchange(Command::GetStatus).await {
                        Ok(Some(_)) => answered += 1,
                        Ok(None) => {
                            missed += 1;
                            core.emit_missed_heartbeat();
                        }
                        Err(SessionError::NotConnected) => break,
                        Err(e) => {
                            log::warn!("Status poll failed: {}", e);
                            break;
                        }
                    }

                    if core.refresh_liveness().await == ConnectionState::Disconnected {
                        break;
                    }
                }
            }
        }

        log::info!("=== Status monitor stopped ({} answered, {} missed) ===", answered, missed);
    }
}
