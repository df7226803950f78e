//! Bootstrap state machine.
//!
//! `Idle -> Starting -> Bootstrapping(progress) -> Ready`. `Ready` latches
//! until [`TorBootstrap::stop`]. Control channel failures are not retried
//! with any escalation; the state simply stalls at its last value and the
//! caller decides when to give up.

use super::control::ControlChannel;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    Starting,
    Bootstrapping(u8),
    Ready,
}

impl BootstrapState {
    pub fn progress(&self) -> u8 {
        match self {
            BootstrapState::Idle | BootstrapState::Starting => 0,
            BootstrapState::Bootstrapping(progress) => *progress,
            BootstrapState::Ready => 100,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, BootstrapState::Ready)
    }
}

/// Extract the bootstrap percentage from a status string.
///
/// Accepts the control-port form `PROGRESS=NN` and the log form
/// `Bootstrapped NN%`.
pub fn parse_progress(status: &str) -> Option<u8> {
    let digits = if let Some(idx) = status.find("PROGRESS=") {
        &status[idx + "PROGRESS=".len()..]
    } else if let Some(idx) = status.find("Bootstrapped ") {
        let rest = &status[idx + "Bootstrapped ".len()..];
        let end = rest.find('%')?;
        &rest[..end]
    } else {
        return None;
    };

    let end = digits
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(digits.len());
    let value: u32 = digits[..end].parse().ok()?;
    Some(value.min(100) as u8)
}

struct Poller {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Watches the Tor control channel until bootstrap completes.
pub struct TorBootstrap {
    channel: Arc<dyn ControlChannel>,
    poll_interval: Duration,
    state: watch::Sender<BootstrapState>,
    poller: Mutex<Option<Poller>>,
}

impl TorBootstrap {
    pub fn new(channel: Arc<dyn ControlChannel>, poll_interval: Duration) -> Self {
        let (state, _) = watch::channel(BootstrapState::Idle);
        Self {
            channel,
            poll_interval,
            state,
            poller: Mutex::new(None),
        }
    }

    /// Begin polling. A no-op while a poller is running or after `Ready`.
    pub fn start(&self) {
        let mut poller = match self.poller.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = poller.as_ref() {
            if !existing.handle.is_finished() || self.is_ready() {
                return;
            }
        }

        self.state.send_replace(BootstrapState::Starting);
        info!("Starting Tor bootstrap");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_until_ready(
            self.channel.clone(),
            self.poll_interval,
            self.state.clone(),
            cancel.clone(),
        ));
        *poller = Some(Poller { cancel, handle });
    }

    /// Stop polling and return to `Idle`.
    pub fn stop(&self) {
        let mut poller = match self.poller.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = poller.take() {
            existing.cancel.cancel();
            existing.handle.abort();
        }
        self.state.send_replace(BootstrapState::Idle);
        info!("Tor bootstrap stopped");
    }

    pub fn state(&self) -> BootstrapState {
        *self.state.borrow()
    }

    pub fn progress(&self) -> u8 {
        self.state().progress()
    }

    pub fn is_ready(&self) -> bool {
        self.state().is_ready()
    }

    pub fn subscribe(&self) -> watch::Receiver<BootstrapState> {
        self.state.subscribe()
    }

    /// Resolve once `Ready` is observed. Returns false if cancelled first.
    pub async fn wait_ready(&self, cancel: &CancellationToken) -> bool {
        let mut rx = self.subscribe();
        tokio::select! {
            _ = cancel.cancelled() => false,
            result = rx.wait_for(BootstrapState::is_ready) => result.is_ok(),
        }
    }
}

impl Drop for TorBootstrap {
    fn drop(&mut self) {
        if let Ok(mut poller) = self.poller.lock() {
            if let Some(existing) = poller.take() {
                existing.cancel.cancel();
                existing.handle.abort();
            }
        }
    }
}

async fn poll_until_ready(
    channel: Arc<dyn ControlChannel>,
    poll_interval: Duration,
    state: watch::Sender<BootstrapState>,
    cancel: CancellationToken,
) {
    loop {
        let phase = tokio::select! {
            _ = cancel.cancelled() => return,
            phase = channel.bootstrap_phase() => phase,
        };

        match phase {
            Ok(status) => {
                if let Some(progress) = parse_progress(&status) {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if progress >= 100 {
                        state.send_replace(BootstrapState::Ready);
                        info!("Tor bootstrap complete");
                        return;
                    }
                    state.send_if_modified(|current| {
                        let next = BootstrapState::Bootstrapping(progress);
                        if *current == next {
                            false
                        } else {
                            debug!("Tor bootstrap at {}%", progress);
                            *current = next;
                            true
                        }
                    });
                }
            }
            Err(e) => debug!("Tor control poll failed: {}", e),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
}
