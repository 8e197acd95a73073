use crate::error::{Result, SimguardError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A named backend operation with its deadline.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: &'static str,
    pub timeout: Duration,
    pub idempotent: bool,
}

impl Operation {
    pub fn new(name: &'static str, timeout: Duration) -> Self {
        Self {
            name,
            timeout,
            idempotent: false,
        }
    }

    pub fn idempotent(name: &'static str, timeout: Duration) -> Self {
        Self {
            name,
            timeout,
            idempotent: true,
        }
    }
}

type Job = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// Runs backend calls off the caller's context and races them against a
/// deadline.
///
/// Each guard owns one dispatcher task; submitted calls run on tasks spawned
/// from it so the caller never blocks and a wedged call never holds up later
/// submissions. There is no true cancellation: a call that outlives its
/// deadline keeps running, and its eventual completion is detected through
/// the generation counter and discarded rather than delivered.
pub struct TimeoutGuard {
    jobs: mpsc::UnboundedSender<Job>,
    generation: Arc<AtomicU64>,
    in_flight: Arc<AtomicUsize>,
    cancel: CancellationToken,
    resilience_enabled: bool,
}

impl TimeoutGuard {
    pub fn new(resilience_enabled: bool) -> Self {
        let (jobs, mut rx) = mpsc::unbounded_channel::<Job>();
        let cancel = CancellationToken::new();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let worker_cancel = cancel.clone();
        let worker_in_flight = Arc::clone(&in_flight);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = worker_cancel.cancelled() => break,
                    job = rx.recv() => match job {
                        Some(job) => {
                            worker_in_flight.fetch_add(1, Ordering::AcqRel);
                            let in_flight = Arc::clone(&worker_in_flight);
                            tokio::spawn(async move {
                                job().await;
                                in_flight.fetch_sub(1, Ordering::AcqRel);
                            });
                        }
                        None => break,
                    }
                }
            }
            debug!("timeout guard worker stopped");
        });

        Self {
            jobs,
            generation: Arc::new(AtomicU64::new(0)),
            in_flight,
            cancel,
            resilience_enabled,
        }
    }

    /// Execute `call` on the guard's worker, racing it against the
    /// operation's deadline.
    ///
    /// On expiry the current generation is retired so a late completion of
    /// this call can never be delivered. With timeout resilience disabled the
    /// call still runs off-context but without a deadline.
    pub async fn execute<T, F, Fut>(&self, operation: &Operation, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let started = Instant::now();
        let submitted_generation = self.generation.load(Ordering::Acquire);
        let generation = Arc::clone(&self.generation);
        let name = operation.name;
        let (tx, rx) = oneshot::channel::<T>();

        let job: Job = Box::new(move || {
            Box::pin(async move {
                let value = call().await;
                if generation.load(Ordering::Acquire) != submitted_generation {
                    debug!(
                        operation = name,
                        "discarding stale completion from a timed-out call"
                    );
                    return;
                }
                // Receiver may be gone if the caller was dropped; fine either way.
                let _ = tx.send(value);
            })
        });

        self.jobs.send(job).map_err(|_| {
            SimguardError::unknown(operation.name, "timeout guard worker is shut down", None)
        })?;

        let outcome = if self.resilience_enabled {
            match tokio::time::timeout(operation.timeout, rx).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(_)) => Err(SimguardError::inconsistent(
                    operation.name,
                    "worker dropped the result channel",
                )),
                Err(_) => {
                    // Retire every in-flight submission so late completions
                    // are discarded instead of applied.
                    self.generation.fetch_add(1, Ordering::AcqRel);
                    Err(SimguardError::timeout(operation.name, operation.timeout))
                }
            }
        } else {
            rx.await.map_err(|_| {
                SimguardError::inconsistent(operation.name, "worker dropped the result channel")
            })
        };

        let elapsed = started.elapsed();
        match &outcome {
            Ok(_) => info!(
                operation = operation.name,
                elapsed_ms = elapsed.as_millis() as u64,
                "operation completed"
            ),
            Err(error) => warn!(
                operation = operation.name,
                elapsed_ms = elapsed.as_millis() as u64,
                %error,
                "operation failed"
            ),
        }
        outcome
    }

    /// Calls submitted but not yet finished, stale ones included.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Stop accepting new calls. In-flight calls keep running detached and
    /// their completions are dropped.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
