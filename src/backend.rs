use crate::device::DeviceId;
use crate::options::TerminationEvent;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// Error payload as reported by the backend, when it bothers to report one.
///
/// Mirrors the backend's domain/code/description convention. Any of the three
/// can be unhelpful; classification sniffs both codes and messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendError {
    pub domain: String,
    pub code: i64,
    pub message: Option<String>,
}

impl BackendError {
    pub fn new<D: Into<String>>(domain: D, code: i64, message: Option<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message,
        }
    }
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} (domain {}, code {})", message, self.domain, self.code),
            None => write!(f, "domain {}, code {}", self.domain, self.code),
        }
    }
}

/// Error domain the backend uses for session lifecycle failures.
pub const SESSION_DOMAIN: &str = "com.backend.session";

/// "No active session for this device", the zombie signature.
pub const CODE_NO_ACTIVE_SESSION: i64 = 146;
/// The device is already in the shutdown state.
pub const CODE_ALREADY_SHUTDOWN: i64 = 147;
/// The backend does not implement the requested operation.
pub const CODE_UNSUPPORTED: i64 = 405;

/// The backend's boolean-plus-error-pointer return convention.
///
/// `success` and `error` are not guaranteed to be consistent with each other;
/// the translator resolves the ambiguity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutcome {
    pub success: bool,
    pub error: Option<BackendError>,
}

impl RawOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failure(error: Option<BackendError>) -> Self {
        Self {
            success: false,
            error,
        }
    }
}

/// The backend's nullable-identifier-plus-error-pointer convention used by
/// launch and spawn. A non-positive pid means "nothing was launched".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLaunch {
    pub pid: Option<i32>,
    pub error: Option<BackendError>,
}

impl RawLaunch {
    pub fn launched(pid: i32) -> Self {
        Self {
            pid: Some(pid),
            error: None,
        }
    }

    pub fn failure(error: Option<BackendError>) -> Self {
        Self { pid: None, error }
    }
}

/// The unreliable device-control backend.
///
/// Any of these calls may block indefinitely when the supervising daemon is
/// wedged; callers go through the timeout guard. Arguments are owned so calls
/// can be shipped to the guard's worker as `'static` futures.
#[async_trait]
pub trait DeviceBackend: Send + Sync {
    async fn boot(&self, device: DeviceId, payload: serde_json::Value) -> RawOutcome;

    async fn shutdown(&self, device: DeviceId) -> RawOutcome;

    async fn install_application(
        &self,
        device: DeviceId,
        app_path: PathBuf,
        payload: serde_json::Value,
    ) -> RawOutcome;

    async fn launch_application(
        &self,
        device: DeviceId,
        app_id: String,
        payload: serde_json::Value,
    ) -> RawLaunch;

    async fn spawn(
        &self,
        device: DeviceId,
        launch_path: PathBuf,
        payload: serde_json::Value,
    ) -> RawLaunch;

    /// Direct media injection. Backends may not support it; see
    /// [`DeviceBackend::upload_media_via_companion`].
    async fn add_media(&self, device: DeviceId, paths: Vec<PathBuf>) -> RawOutcome;

    /// Polyfill path: simulated upload through a companion application.
    async fn upload_media_via_companion(&self, device: DeviceId, paths: Vec<PathBuf>)
        -> RawOutcome;

    /// Forcibly terminate the device's supervising process. Used by wedge
    /// recovery; must not go through the (possibly wedged) guarded path.
    async fn terminate_supervisor(&self, device: DeviceId) -> RawOutcome;

    /// Resolve when the given process exits. Returns `None` if the backend
    /// cannot watch the process.
    async fn wait_for_exit(&self, pid: i32) -> Option<TerminationEvent>;
}

/// Raw process record from the process-table query service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProcess {
    pub pid: i32,
    pub launch_path: PathBuf,
    pub arguments: Vec<String>,
}

/// The process-table query collaborator.
#[async_trait]
pub trait ProcessQuery: Send + Sync {
    /// Look up a process by pid. `None` when the pid is not (yet) enumerable.
    async fn lookup(&self, pid: i32) -> Option<RawProcess>;
}

pub use mock::{MockDeviceBackend, MockProcessQuery, MockResponse};

/// Scripted collaborators for tests and downstream consumers.
pub mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::time::Duration;

    /// One scripted backend response.
    #[derive(Debug)]
    pub enum MockResponse {
        Outcome(RawOutcome),
        Launch(RawLaunch),
        /// Never resolves, like a wedged daemon.
        Hang,
        /// Resolve after a delay, like a slow daemon.
        Delayed(Duration, Box<MockResponse>),
    }

    /// Scripted [`DeviceBackend`] with per-operation response queues and call
    /// counters. Operations with an exhausted (or absent) script succeed.
    #[derive(Default)]
    pub struct MockDeviceBackend {
        scripts: Mutex<HashMap<&'static str, VecDeque<MockResponse>>>,
        calls: Mutex<HashMap<&'static str, u32>>,
        exits: Mutex<HashMap<i32, TerminationEvent>>,
        default_pid: Mutex<i32>,
    }

    impl MockDeviceBackend {
        pub fn new() -> Self {
            Self {
                default_pid: Mutex::new(1000),
                ..Default::default()
            }
        }

        /// Queue responses for an operation, served in order.
        pub fn script<I>(&self, operation: &'static str, responses: I)
        where
            I: IntoIterator<Item = MockResponse>,
        {
            self.scripts
                .lock()
                .entry(operation)
                .or_default()
                .extend(responses);
        }

        /// Number of times an operation was invoked.
        pub fn calls(&self, operation: &'static str) -> u32 {
            self.calls.lock().get(operation).copied().unwrap_or(0)
        }

        /// Script the termination event delivered by `wait_for_exit`.
        pub fn script_exit(&self, pid: i32, event: TerminationEvent) {
            self.exits.lock().insert(pid, event);
        }

        fn record(&self, operation: &'static str) -> Option<MockResponse> {
            *self.calls.lock().entry(operation).or_insert(0) += 1;
            self.scripts
                .lock()
                .get_mut(operation)
                .and_then(VecDeque::pop_front)
        }

        async fn outcome(&self, operation: &'static str) -> RawOutcome {
            match self.record(operation) {
                None => RawOutcome::success(),
                Some(response) => resolve_outcome(response).await,
            }
        }

        async fn launch(&self, operation: &'static str) -> RawLaunch {
            match self.record(operation) {
                None => {
                    let mut pid = self.default_pid.lock();
                    *pid += 1;
                    RawLaunch::launched(*pid)
                }
                Some(response) => resolve_launch(response).await,
            }
        }
    }

    async fn resolve_outcome(response: MockResponse) -> RawOutcome {
        match response {
            MockResponse::Outcome(outcome) => outcome,
            MockResponse::Hang => std::future::pending().await,
            MockResponse::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                match *inner {
                    MockResponse::Outcome(outcome) => outcome,
                    other => panic!("scripted {other:?} where an outcome was expected"),
                }
            }
            other => panic!("scripted {other:?} where an outcome was expected"),
        }
    }

    async fn resolve_launch(response: MockResponse) -> RawLaunch {
        match response {
            MockResponse::Launch(launch) => launch,
            MockResponse::Hang => std::future::pending().await,
            MockResponse::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                match *inner {
                    MockResponse::Launch(launch) => launch,
                    other => panic!("scripted {other:?} where a launch was expected"),
                }
            }
            other => panic!("scripted {other:?} where a launch was expected"),
        }
    }

    #[async_trait]
    impl DeviceBackend for MockDeviceBackend {
        async fn boot(&self, _device: DeviceId, _payload: serde_json::Value) -> RawOutcome {
            self.outcome("boot").await
        }

        async fn shutdown(&self, _device: DeviceId) -> RawOutcome {
            self.outcome("shutdown").await
        }

        async fn install_application(
            &self,
            _device: DeviceId,
            _app_path: PathBuf,
            _payload: serde_json::Value,
        ) -> RawOutcome {
            self.outcome("install_application").await
        }

        async fn launch_application(
            &self,
            _device: DeviceId,
            _app_id: String,
            _payload: serde_json::Value,
        ) -> RawLaunch {
            self.launch("launch_application").await
        }

        async fn spawn(
            &self,
            _device: DeviceId,
            _launch_path: PathBuf,
            _payload: serde_json::Value,
        ) -> RawLaunch {
            self.launch("spawn").await
        }

        async fn add_media(&self, _device: DeviceId, _paths: Vec<PathBuf>) -> RawOutcome {
            self.outcome("add_media").await
        }

        async fn upload_media_via_companion(
            &self,
            _device: DeviceId,
            _paths: Vec<PathBuf>,
        ) -> RawOutcome {
            self.outcome("upload_media_via_companion").await
        }

        async fn terminate_supervisor(&self, _device: DeviceId) -> RawOutcome {
            self.outcome("terminate_supervisor").await
        }

        async fn wait_for_exit(&self, pid: i32) -> Option<TerminationEvent> {
            *self.calls.lock().entry("wait_for_exit").or_insert(0) += 1;
            let event = self.exits.lock().get(&pid).copied();
            match event {
                Some(event) => Some(event),
                // No scripted exit: behave like a process that never ends.
                None => std::future::pending().await,
            }
        }
    }

    /// Scripted [`ProcessQuery`] that returns `NotFound` a fixed number of
    /// times before the process becomes enumerable.
    pub struct MockProcessQuery {
        process: RawProcess,
        not_found_before: u32,
        lookups: Mutex<u32>,
    }

    impl MockProcessQuery {
        pub fn new(process: RawProcess, not_found_before: u32) -> Self {
            Self {
                process,
                not_found_before,
                lookups: Mutex::new(0),
            }
        }

        /// Immediately enumerable process.
        pub fn visible(process: RawProcess) -> Self {
            Self::new(process, 0)
        }

        pub fn lookups(&self) -> u32 {
            *self.lookups.lock()
        }
    }

    #[async_trait]
    impl ProcessQuery for MockProcessQuery {
        async fn lookup(&self, pid: i32) -> Option<RawProcess> {
            let mut lookups = self.lookups.lock();
            *lookups += 1;
            if *lookups <= self.not_found_before || pid != self.process.pid {
                return None;
            }
            Some(self.process.clone())
        }
    }
}
