use crate::backend::{DeviceBackend, ProcessQuery};
use crate::config::SimguardConfig;
use crate::device::{Device, DeviceState};
use crate::error::{Result, SimguardError};
use crate::guard::{Operation, TimeoutGuard};
use crate::media;
use crate::options::{BootOptions, InstallOptions, LaunchOptions, SpawnOptions};
use crate::process::{ProcessCorrelator, ProcessDescriptor};
use crate::shutdown::ShutdownMachine;
use crate::translate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Resilient wrapper around one device's backend operations.
///
/// Mirrors the backend's operation surface, augmented with timeout-guarded
/// invocation, result normalization, and shutdown recovery. Holds a
/// non-owning [`Device`] handle supplied by the lifecycle manager.
///
/// The backend's concurrency safety against a single device is unproven, so
/// callers should serialize operations per device; the wrapper does not
/// enforce this structurally.
pub struct DeviceWrapper {
    device: Device,
    backend: Arc<dyn DeviceBackend>,
    guard: TimeoutGuard,
    correlator: ProcessCorrelator,
    config: SimguardConfig,
}

impl DeviceWrapper {
    /// Wrap a device. Fails if the configuration is invalid; this is the only
    /// startup-abort path.
    pub fn new(
        device: Device,
        backend: Arc<dyn DeviceBackend>,
        process_query: Arc<dyn ProcessQuery>,
        config: SimguardConfig,
    ) -> Result<Self> {
        config.validate()?;
        let guard = TimeoutGuard::new(config.resilience.timeout_resilience_enabled);
        let correlator = ProcessCorrelator::new(process_query, config.correlation.clone());
        info!(
            device = %device.id(),
            resilience = config.resilience.timeout_resilience_enabled,
            "created device wrapper"
        );
        Ok(Self {
            device,
            backend,
            guard,
            correlator,
            config,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Boot the device.
    pub async fn boot(&self, options: BootOptions) -> Result<()> {
        options.validate()?;
        let state = self.device.state();
        // The self-loop allowance in `can_transition_to` must not let a boot
        // call through for a device that is already up.
        if state == DeviceState::Booted || !state.can_transition_to(DeviceState::Booted) {
            return Err(SimguardError::rejected(
                "boot",
                format!("cannot boot device in state {state}"),
                None,
            ));
        }

        let operation = Operation::new("boot", self.config.timeouts.boot());
        let backend = Arc::clone(&self.backend);
        let id = self.device.id();
        let payload = options.to_payload();
        let raw = self
            .guard
            .execute(&operation, move || async move {
                backend.boot(id, payload).await
            })
            .await?;
        translate::outcome("boot", raw)?;
        self.device.transition(DeviceState::Booted)?;
        Ok(())
    }

    /// Shut the device down, recovering from wedged daemons and zombie
    /// sessions. Idempotent: an already-shutdown device always succeeds.
    pub async fn shutdown(&self) -> Result<()> {
        let mut machine = ShutdownMachine::new(self.config.shutdown.clone());
        let result = machine
            .run(
                &self.device,
                &self.backend,
                &self.guard,
                self.config.timeouts.shutdown(),
            )
            .await;
        let ledger = machine.attempts();
        info!(
            device = %self.device.id(),
            attempts = ledger.attempts,
            forced_terminations = ledger.forced_terminations,
            elapsed_ms = ledger.elapsed.as_millis() as u64,
            success = result.is_ok(),
            "shutdown finished"
        );
        result
    }

    /// Install an application bundle on the device.
    pub async fn install_application<P: AsRef<Path>>(
        &self,
        app_path: P,
        options: InstallOptions,
    ) -> Result<()> {
        let app_path = app_path.as_ref().to_path_buf();
        if !app_path.exists() {
            return Err(SimguardError::invalid_path(
                app_path,
                "application bundle does not exist",
            ));
        }

        let operation = Operation::new("install_application", self.config.timeouts.install());
        let backend = Arc::clone(&self.backend);
        let id = self.device.id();
        let payload = options.to_payload();
        let raw = self
            .guard
            .execute(&operation, move || async move {
                backend.install_application(id, app_path, payload).await
            })
            .await?;
        translate::outcome("install_application", raw)
    }

    /// Launch an installed application and correlate the result into a full
    /// process descriptor.
    pub async fn launch_application(
        &self,
        app_id: &str,
        options: LaunchOptions,
    ) -> Result<ProcessDescriptor> {
        options.validate()?;

        let operation = Operation::new("launch_application", self.config.timeouts.launch());
        let backend = Arc::clone(&self.backend);
        let id = self.device.id();
        let app = app_id.to_string();
        let payload = options.to_payload();
        let raw = self
            .guard
            .execute(&operation, move || async move {
                backend.launch_application(id, app, payload).await
            })
            .await?;
        let pid = translate::launch("launch_application", raw)?;
        self.correlator.correlate(self.device.id(), pid).await
    }

    /// Spawn an arbitrary binary on the device.
    ///
    /// When [`SpawnOptions::termination`] is set, a watcher task on the
    /// wrapper's runtime delivers the process's termination event through it.
    pub async fn spawn<P: AsRef<Path>>(
        &self,
        launch_path: P,
        mut options: SpawnOptions,
    ) -> Result<ProcessDescriptor> {
        options.validate()?;
        let termination = options.termination.take();

        let operation = Operation::new("spawn", self.config.timeouts.spawn());
        let backend = Arc::clone(&self.backend);
        let id = self.device.id();
        let path = launch_path.as_ref().to_path_buf();
        let payload = options.to_payload();
        let raw = self
            .guard
            .execute(&operation, move || async move {
                backend.spawn(id, path, payload).await
            })
            .await?;
        let pid = translate::launch("spawn", raw)?;
        let descriptor = self.correlator.correlate(self.device.id(), pid).await?;

        if let Some(sender) = termination {
            let backend = Arc::clone(&self.backend);
            tokio::spawn(async move {
                if let Some(event) = backend.wait_for_exit(pid).await {
                    if sender.send(event).is_err() {
                        debug!(pid, "termination receiver dropped before delivery");
                    }
                }
            });
        }

        Ok(descriptor)
    }

    /// Inject media assets, with polyfill fallback.
    pub async fn add_media(&self, paths: Vec<PathBuf>) -> Result<()> {
        media::add_media(
            &self.device,
            &self.backend,
            &self.guard,
            self.config.timeouts.media(),
            paths,
        )
        .await
    }

    /// Stop accepting operations. In-flight backend calls keep running
    /// detached; their completions are discarded.
    pub fn close(&self) {
        self.guard.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BackendError, MockDeviceBackend, MockProcessQuery, MockResponse, RawLaunch, RawProcess,
        CODE_NO_ACTIVE_SESSION, SESSION_DOMAIN,
    };
    use crate::device::DeviceId;
    use crate::options::{ExitStatus, TerminationEvent};
    use tokio::sync::oneshot;

    fn raw_process(pid: i32) -> RawProcess {
        RawProcess {
            pid,
            launch_path: PathBuf::from("/Applications/Sample.app/Sample"),
            arguments: vec![],
        }
    }

    fn wrapper_with(
        backend: Arc<MockDeviceBackend>,
        query: MockProcessQuery,
        state: DeviceState,
    ) -> DeviceWrapper {
        let device = Device::new(DeviceId::new(), "test-device", state);
        DeviceWrapper::new(
            device,
            backend as Arc<dyn DeviceBackend>,
            Arc::new(query) as Arc<dyn ProcessQuery>,
            SimguardConfig::default(),
        )
        .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_transitions_device() {
        let backend = Arc::new(MockDeviceBackend::new());
        let wrapper = wrapper_with(
            Arc::clone(&backend),
            MockProcessQuery::visible(raw_process(1)),
            DeviceState::Creating,
        );

        wrapper.boot(BootOptions::default()).await.unwrap();
        assert_eq!(wrapper.device().state(), DeviceState::Booted);
        assert_eq!(backend.calls("boot"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_rejected_for_booted_device_without_backend_call() {
        let backend = Arc::new(MockDeviceBackend::new());
        let wrapper = wrapper_with(
            Arc::clone(&backend),
            MockProcessQuery::visible(raw_process(1)),
            DeviceState::Booted,
        );

        let err = wrapper.boot(BootOptions::default()).await.unwrap_err();
        assert!(err.to_string().contains("cannot boot"));
        assert_eq!(backend.calls("boot"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_correlates_descriptor() {
        let backend = Arc::new(MockDeviceBackend::new());
        backend.script(
            "launch_application",
            vec![MockResponse::Launch(RawLaunch::launched(4242))],
        );
        let wrapper = wrapper_with(
            Arc::clone(&backend),
            MockProcessQuery::visible(raw_process(4242)),
            DeviceState::Booted,
        );

        let descriptor = wrapper
            .launch_application("com.example.sample", LaunchOptions::default())
            .await
            .unwrap();
        assert_eq!(descriptor.pid, 4242);
        assert_eq!(descriptor.device, wrapper.device().id());
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_visibility_race_is_tolerated() {
        let backend = Arc::new(MockDeviceBackend::new());
        backend.script(
            "launch_application",
            vec![MockResponse::Launch(RawLaunch::launched(4242))],
        );
        let wrapper = wrapper_with(
            Arc::clone(&backend),
            MockProcessQuery::new(raw_process(4242), 3),
            DeviceState::Booted,
        );

        let descriptor = wrapper
            .launch_application("com.example.sample", LaunchOptions::default())
            .await
            .unwrap();
        assert_eq!(descriptor.pid, 4242);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_delivers_termination_event() {
        let backend = Arc::new(MockDeviceBackend::new());
        backend.script("spawn", vec![MockResponse::Launch(RawLaunch::launched(77))]);
        backend.script_exit(
            77,
            TerminationEvent {
                pid: 77,
                status: ExitStatus::Exited(0),
            },
        );
        let wrapper = wrapper_with(
            Arc::clone(&backend),
            MockProcessQuery::visible(raw_process(77)),
            DeviceState::Booted,
        );

        let (tx, rx) = oneshot::channel();
        let descriptor = wrapper
            .spawn(
                "/usr/bin/true",
                SpawnOptions {
                    termination: Some(tx),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(descriptor.pid, 77);

        let event = rx.await.unwrap();
        assert_eq!(event.pid, 77);
        assert_eq!(event.status, ExitStatus::Exited(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_install_missing_bundle_fails_before_backend_call() {
        let backend = Arc::new(MockDeviceBackend::new());
        let wrapper = wrapper_with(
            Arc::clone(&backend),
            MockProcessQuery::visible(raw_process(1)),
            DeviceState::Booted,
        );

        let err = wrapper
            .install_application("/nope/Sample.app", InstallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SimguardError::InvalidPath { .. }));
        assert_eq!(backend.calls("install_application"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_shutdown_is_idempotent() {
        let backend = Arc::new(MockDeviceBackend::new());
        backend.script(
            "shutdown",
            vec![MockResponse::Outcome(
                crate::backend::RawOutcome::failure(Some(BackendError::new(
                    SESSION_DOMAIN,
                    CODE_NO_ACTIVE_SESSION,
                    Some("No active session".to_string()),
                ))),
            )],
        );
        let wrapper = wrapper_with(
            Arc::clone(&backend),
            MockProcessQuery::visible(raw_process(1)),
            DeviceState::Booted,
        );

        wrapper.shutdown().await.unwrap();
        assert_eq!(wrapper.device().state(), DeviceState::Shutdown);

        // Subsequent calls short-circuit without touching the backend.
        wrapper.shutdown().await.unwrap();
        wrapper.shutdown().await.unwrap();
        assert_eq!(backend.calls("shutdown"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_config_rejected_at_construction() {
        let mut config = SimguardConfig::default();
        config.timeouts.shutdown_ms = 0;
        let device = Device::new(DeviceId::new(), "test-device", DeviceState::Booted);
        let result = DeviceWrapper::new(
            device,
            Arc::new(MockDeviceBackend::new()) as Arc<dyn DeviceBackend>,
            Arc::new(MockProcessQuery::visible(raw_process(1))) as Arc<dyn ProcessQuery>,
            config,
        );
        assert!(result.is_err());
    }
}
