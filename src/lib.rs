pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod guard;
pub mod media;
pub mod options;
pub mod process;
pub mod shutdown;
pub mod translate;
pub mod wrapper;

pub use backend::{
    BackendError, DeviceBackend, MockDeviceBackend, MockProcessQuery, MockResponse, ProcessQuery,
    RawLaunch, RawOutcome, RawProcess,
};
pub use config::{
    CorrelationConfig, ResilienceConfig, ShutdownConfig, SimguardConfig, TimeoutConfig,
};
pub use device::{Device, DeviceId, DeviceState};
pub use error::{ErrorCategory, Result, SimguardError};
pub use guard::{Operation, TimeoutGuard};
pub use options::{
    BootOptions, ExitStatus, InstallOptions, LaunchOptions, SpawnOptions, TerminationEvent,
};
pub use process::{ProcessCorrelator, ProcessDescriptor};
pub use shutdown::{ShutdownAttempts, ShutdownMachine, ShutdownPhase};
pub use wrapper::DeviceWrapper;
