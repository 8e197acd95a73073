use crate::backend::DeviceBackend;
use crate::config::ShutdownConfig;
use crate::device::{Device, DeviceState};
use crate::error::{ErrorCategory, Result, SimguardError};
use crate::guard::{Operation, TimeoutGuard};
use crate::translate;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Phase of one shutdown request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPhase {
    Idle,
    Attempting,
    RecoveringFromWedge,
    RecoveringFromZombie,
    Succeeded,
    Failed,
}

impl ShutdownPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ShutdownPhase::Succeeded | ShutdownPhase::Failed)
    }
}

/// Attempt ledger for one shutdown request.
#[derive(Debug, Clone, Default)]
pub struct ShutdownAttempts {
    /// Backend shutdown calls issued, bounded by `max_attempts`.
    pub attempts: u32,
    /// Forced supervisor terminations issued during wedge recovery.
    pub forced_terminations: u32,
    pub last_category: Option<ErrorCategory>,
    pub elapsed: Duration,
}

/// Classifies shutdown failures and drives targeted recovery.
///
/// Shutting a device down is hairier than one backend call: the daemon can
/// wedge mid-call, and a session whose supervising process already died
/// ("zombie") makes the backend report failure for something that is
/// observably done. The machine absorbs recoverable failures and only
/// surfaces an error once the attempt budget is spent or the failure is
/// unrecoverable.
pub struct ShutdownMachine {
    phase: ShutdownPhase,
    ledger: ShutdownAttempts,
    config: ShutdownConfig,
}

impl ShutdownMachine {
    pub fn new(config: ShutdownConfig) -> Self {
        Self {
            phase: ShutdownPhase::Idle,
            ledger: ShutdownAttempts::default(),
            config,
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.phase
    }

    pub fn attempts(&self) -> &ShutdownAttempts {
        &self.ledger
    }

    fn enter(&mut self, next: ShutdownPhase) {
        if self.phase != next {
            debug!("shutdown machine {:?} -> {:?}", self.phase, next);
            self.phase = next;
        }
    }

    /// Drive a shutdown request to a terminal phase.
    ///
    /// Idempotent by policy: any state observably equivalent to "already
    /// shutdown" resolves to success, never an error.
    pub async fn run(
        &mut self,
        device: &Device,
        backend: &Arc<dyn DeviceBackend>,
        guard: &TimeoutGuard,
        timeout: Duration,
    ) -> Result<()> {
        let started = Instant::now();

        if device.state() == DeviceState::Shutdown {
            info!(device = %device.id(), "device already shutdown, nothing to do");
            self.enter(ShutdownPhase::Succeeded);
            return Ok(());
        }

        self.enter(ShutdownPhase::Attempting);
        match device.state() {
            // Mid-flight states keep their position in the lifecycle.
            DeviceState::ShuttingDown | DeviceState::Zombie => {}
            _ => {
                if let Err(failure) = device.transition(DeviceState::ShuttingDown) {
                    self.enter(ShutdownPhase::Failed);
                    return Err(failure);
                }
            }
        }

        let max_attempts = self.config.max_attempts.max(1);
        loop {
            self.ledger.attempts += 1;
            let attempt = self.ledger.attempts;
            info!(
                device = %device.id(),
                attempt,
                max_attempts,
                "attempting backend shutdown"
            );

            let operation = Operation::idempotent("shutdown", timeout);
            let call_backend = Arc::clone(backend);
            let id = device.id();
            let result = guard
                .execute(&operation, move || async move {
                    call_backend.shutdown(id).await
                })
                .await
                .and_then(|raw| translate::outcome("shutdown", raw));
            self.ledger.elapsed = started.elapsed();

            match result {
                Ok(()) => {
                    if let Err(failure) = device.transition(DeviceState::Shutdown) {
                        self.enter(ShutdownPhase::Failed);
                        return Err(failure);
                    }
                    self.enter(ShutdownPhase::Succeeded);
                    info!(device = %device.id(), attempt, "shutdown succeeded");
                    return Ok(());
                }
                Err(failure) => {
                    let category = failure.category();
                    self.ledger.last_category = Some(category);
                    match category {
                        ErrorCategory::ZombieDevice => {
                            self.enter(ShutdownPhase::RecoveringFromZombie);
                            info!(
                                device = %device.id(),
                                attempt,
                                "session already gone, treating device as shutdown"
                            );
                            let landed = if device.state() == DeviceState::ShuttingDown {
                                device
                                    .transition(DeviceState::Zombie)
                                    .and_then(|_| device.transition(DeviceState::Shutdown))
                            } else {
                                device.transition(DeviceState::Shutdown)
                            };
                            if let Err(failure) = landed {
                                self.enter(ShutdownPhase::Failed);
                                return Err(failure);
                            }
                            self.enter(ShutdownPhase::Succeeded);
                            return Ok(());
                        }
                        ErrorCategory::BackendTimeout | ErrorCategory::WedgedBackend => {
                            self.enter(ShutdownPhase::RecoveringFromWedge);
                            if attempt >= max_attempts {
                                self.enter(ShutdownPhase::Failed);
                                error!(
                                    device = %device.id(),
                                    attempt,
                                    "shutdown attempts exhausted"
                                );
                                return Err(SimguardError::ShutdownExhausted {
                                    attempts: attempt,
                                    message: failure.to_string(),
                                });
                            }
                            warn!(
                                device = %device.id(),
                                attempt,
                                %failure,
                                "backend wedged, recovering"
                            );
                            self.force_terminate_supervisor(device, backend).await;
                            self.enter(ShutdownPhase::Attempting);
                        }
                        _ => {
                            self.enter(ShutdownPhase::Failed);
                            error!(
                                device = %device.id(),
                                attempt,
                                %failure,
                                "shutdown failed with unrecoverable error"
                            );
                            return Err(failure);
                        }
                    }
                }
            }
        }
    }

    /// Kill the stuck supervising process so the wedged call can unblock.
    ///
    /// Deliberately bypasses the timeout guard: the guarded path may be the
    /// very thing that is wedged. Failures here are logged and the shutdown
    /// retried regardless, since the kill may still have landed.
    async fn force_terminate_supervisor(&mut self, device: &Device, backend: &Arc<dyn DeviceBackend>) {
        self.ledger.forced_terminations += 1;
        info!(
            device = %device.id(),
            attempt = self.ledger.attempts,
            termination = self.ledger.forced_terminations,
            "forcing supervisor termination"
        );
        match tokio::time::timeout(
            self.config.kill_timeout(),
            backend.terminate_supervisor(device.id()),
        )
        .await
        {
            Ok(raw) => {
                if let Err(failure) = translate::outcome("terminate_supervisor", raw) {
                    warn!(
                        device = %device.id(),
                        %failure,
                        "supervisor termination reported failure, retrying shutdown anyway"
                    );
                }
            }
            Err(_) => warn!(
                device = %device.id(),
                "supervisor termination timed out, retrying shutdown anyway"
            ),
        }
    }
}
