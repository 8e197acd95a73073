use crate::backend::ProcessQuery;
use crate::config::CorrelationConfig;
use crate::device::DeviceId;
use crate::error::{Result, SimguardError};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Full process record correlated to the device it runs on.
///
/// Correlation is a lookup relationship, not ownership: a descriptor refers to
/// at most one device and the wrapper never manages the process itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessDescriptor {
    pub pid: i32,
    pub launch_path: PathBuf,
    pub arguments: Vec<String>,
    pub device: DeviceId,
}

/// Enriches raw launch identifiers into [`ProcessDescriptor`]s through the
/// process-query collaborator.
pub struct ProcessCorrelator {
    query: Arc<dyn ProcessQuery>,
    config: CorrelationConfig,
}

impl ProcessCorrelator {
    pub fn new(query: Arc<dyn ProcessQuery>, config: CorrelationConfig) -> Self {
        Self { query, config }
    }

    /// Resolve a raw pid into a full descriptor.
    ///
    /// A freshly launched process may not be enumerable yet; lookups are
    /// retried up to the configured count with a fixed backoff before the
    /// race is surfaced as an inconsistent-state failure.
    pub async fn correlate(&self, device: DeviceId, pid: i32) -> Result<ProcessDescriptor> {
        if pid <= 0 {
            return Err(SimguardError::inconsistent(
                "correlate",
                format!("cannot correlate non-positive pid {pid}"),
            ));
        }

        let max_retries = self.config.max_retries.max(1);
        for attempt in 1..=max_retries {
            if let Some(raw) = self.query.lookup(pid).await {
                debug!(%device, pid, attempt, "correlated process");
                return Ok(ProcessDescriptor {
                    pid: raw.pid,
                    launch_path: raw.launch_path,
                    arguments: raw.arguments,
                    device,
                });
            }

            if attempt < max_retries {
                debug!(
                    %device,
                    pid,
                    attempt,
                    backoff_ms = self.config.backoff_ms,
                    "process not yet enumerable, retrying"
                );
                sleep(self.config.backoff()).await;
            }
        }

        warn!(%device, pid, max_retries, "process never became enumerable");
        Err(SimguardError::inconsistent(
            "correlate",
            format!("pid {pid} was not enumerable after {max_retries} lookups"),
        ))
    }
}
