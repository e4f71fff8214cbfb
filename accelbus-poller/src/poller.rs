//! Continuous acquisition with bounded retry.
//!
//! One [`Poller`] owns one [`DeviceSession`] and drives it through
//!
//! ```text
//! Idle -> Reading -> Decoding -> Idle
//!            |
//!            +-> Backoff -> Reading
//!            +-> Stopped
//! ```
//!
//! emitting exactly one [`PollOutcome`] per read attempt to a [`PollSink`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::register_map::RegisterMap;
use crate::session::DeviceSession;
use crate::sink::PollSink;
use crate::snapshot::DecodedSnapshot;
use crate::transport::{TransientPolicy, Transport, TransportError};

/// Timing and retry settings of one poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerSettings {
    /// Sleep between successful cycles.
    pub poll_interval: Duration,
    /// Sleep after a transient failure before retrying.
    pub backoff: Duration,
    /// Consecutive transient failures tolerated before stopping.
    pub max_consecutive_failures: u32,
    pub policy: TransientPolicy,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            backoff: Duration::from_millis(250),
            max_consecutive_failures: 3,
            policy: TransientPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Reading,
    Decoding,
    Backoff,
    Stopped,
}

impl fmt::Display for PollerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PollerState::Idle => "idle",
            PollerState::Reading => "reading",
            PollerState::Decoding => "decoding",
            PollerState::Backoff => "backoff",
            PollerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why a poller gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FatalReason {
    /// The transport failed with an error the policy does not retry.
    #[error("non-transient transport error: {0}")]
    NonTransient(TransportError),

    /// Transient errors hit the consecutive-failure limit.
    #[error("gave up after {attempts} consecutive failures, last: {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },
}

impl FatalReason {
    /// The transport error that ended polling.
    pub fn transport_error(&self) -> &TransportError {
        match self {
            FatalReason::NonTransient(e) => e,
            FatalReason::RetriesExhausted { last, .. } => last,
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Snapshot(DecodedSnapshot),
    /// `attempt` counts consecutive failures, starting at 1.
    TransientError {
        reason: TransportError,
        attempt: u32,
    },
    FatalError {
        reason: FatalReason,
    },
}

impl PollOutcome {
    pub fn is_snapshot(&self) -> bool {
        matches!(self, PollOutcome::Snapshot(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, PollOutcome::TransientError { .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, PollOutcome::FatalError { .. })
    }
}

/// How [`Poller::run`] ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerExit {
    /// The stop signal was observed.
    Stopped,
    /// A [`PollOutcome::FatalError`] was emitted.
    Fatal(FatalReason),
    /// The sink stopped accepting outcomes.
    SinkClosed,
}

/// Drives one device session on a fixed cadence.
pub struct Poller<T> {
    device: String,
    session: DeviceSession<T>,
    map: Arc<RegisterMap>,
    settings: PollerSettings,
    state: PollerState,
    failures: u32,
    stop: Option<watch::Receiver<bool>>,
}

impl<T: Transport> Poller<T> {
    pub fn new(
        device: impl Into<String>,
        session: DeviceSession<T>,
        map: Arc<RegisterMap>,
        settings: PollerSettings,
    ) -> Self {
        Self {
            device: device.into(),
            session,
            map,
            settings,
            state: PollerState::Idle,
            failures: 0,
            stop: None,
        }
    }

    /// Stop when `stop` turns true.
    ///
    /// Checked at the start of every cycle and after each sleep; a read in flight
    /// always completes and its outcome is emitted first.
    pub fn with_stop(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn settings(&self) -> &PollerSettings {
        &self.settings
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    pub fn session(&self) -> &DeviceSession<T> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut DeviceSession<T> {
        &mut self.session
    }

    /// Consecutive failures since the last successful read.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    fn transition(&mut self, next: PollerState) {
        trace!(device = %self.device, from = %self.state, to = %next, "Poller transition");
        self.state = next;
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Sleep for `duration`, waking early if a stop is requested.
    async fn pause(&mut self, duration: Duration) {
        match self.stop.as_mut() {
            Some(rx) => {
                let sleep = tokio::time::sleep(duration);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => break,
                        changed = rx.changed() => {
                            if changed.is_err() {
                                // Sender gone: nobody can ask for a stop any more
                                (&mut sleep).await;
                                break;
                            }
                            if *rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
            None => tokio::time::sleep(duration).await,
        }
    }

    /// Run until a stop request, a fatal error or a closed sink.
    ///
    /// Emits exactly one outcome per read attempt, in order. After a
    /// [`PollOutcome::FatalError`] nothing else is emitted.
    ///
    /// `Stopped` is terminal: running a stopped poller again returns
    /// [`PollerExit::Stopped`] without touching the bus. Build a new poller to restart.
    pub async fn run<S: PollSink>(&mut self, sink: &mut S) -> PollerExit {
        if self.state == PollerState::Stopped {
            debug!(device = %self.device, "Poller already stopped");
            return PollerExit::Stopped;
        }

        info!(
            device = %self.device,
            map = %self.map.name(),
            interval_ms = self.settings.poll_interval.as_millis() as u64,
            max_failures = self.settings.max_consecutive_failures,
            "Starting poller"
        );

        loop {
            if self.stop_requested() {
                self.transition(PollerState::Stopped);
                info!(device = %self.device, "Poller stopped on request");
                return PollerExit::Stopped;
            }

            self.transition(PollerState::Reading);
            let outcome = match self.session.read_block(&self.map).await {
                Ok(snapshot) => {
                    self.transition(PollerState::Decoding);
                    self.failures = 0;
                    if !snapshot.is_complete() {
                        warn!(
                            device = %self.device,
                            errors = snapshot.errors().len(),
                            "Snapshot has undecodable fields"
                        );
                    }
                    debug!(
                        device = %self.device,
                        fields = snapshot.values().len(),
                        "Decoded snapshot"
                    );
                    PollOutcome::Snapshot(snapshot)
                }
                Err(e) => self.on_failure(e),
            };

            let next = match &outcome {
                PollOutcome::Snapshot(_) => PollerState::Idle,
                PollOutcome::TransientError { .. } => PollerState::Backoff,
                PollOutcome::FatalError { .. } => PollerState::Stopped,
            };
            let fatal = match &outcome {
                PollOutcome::FatalError { reason } => Some(reason.clone()),
                _ => None,
            };

            if sink.emit(outcome).await.is_err() {
                warn!(device = %self.device, "Outcome sink closed, stopping poller");
                self.transition(PollerState::Stopped);
                return PollerExit::SinkClosed;
            }

            self.transition(next);
            match next {
                PollerState::Stopped => {
                    return match fatal {
                        Some(reason) => PollerExit::Fatal(reason),
                        None => PollerExit::Stopped,
                    };
                }
                PollerState::Backoff => {
                    self.pause(self.settings.backoff).await;
                    if self.stop_requested() {
                        self.transition(PollerState::Stopped);
                        info!(device = %self.device, "Poller stopped during backoff");
                        return PollerExit::Stopped;
                    }
                }
                _ => self.pause(self.settings.poll_interval).await,
            }
        }
    }

    fn on_failure(&mut self, error: TransportError) -> PollOutcome {
        if !error.is_transient_under(&self.settings.policy) {
            error!(device = %self.device, error = %error, "Non-transient transport error");
            return PollOutcome::FatalError {
                reason: FatalReason::NonTransient(error),
            };
        }

        if self.failures >= self.settings.max_consecutive_failures {
            let attempts = self.failures + 1;
            error!(
                device = %self.device,
                attempts,
                error = %error,
                "Consecutive failure limit reached"
            );
            return PollOutcome::FatalError {
                reason: FatalReason::RetriesExhausted {
                    attempts,
                    last: error,
                },
            };
        }

        self.failures += 1;
        warn!(
            device = %self.device,
            attempt = self.failures,
            error = %error,
            "Transient read failure, backing off"
        );
        PollOutcome::TransientError {
            reason: error,
            attempt: self.failures,
        }
    }
}
