use crate::backend::DeviceBackend;
use crate::device::Device;
use crate::error::{ErrorCategory, Result, SimguardError};
use crate::guard::{Operation, TimeoutGuard};
use crate::translate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "heic"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v"];

fn is_supported_media(path: &Path) -> bool {
    path.extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            let extension = extension.to_lowercase();
            IMAGE_EXTENSIONS.contains(&extension.as_str())
                || VIDEO_EXTENSIONS.contains(&extension.as_str())
        })
        .unwrap_or(false)
}

/// Check every path before any backend call is attempted.
///
/// Fails fast on the first path that does not exist or is not a supported
/// media type, naming the offending path.
pub fn validate_paths(paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() {
        return Err(SimguardError::rejected(
            "add_media",
            "no media paths supplied",
            None,
        ));
    }
    for path in paths {
        if !path.exists() {
            return Err(SimguardError::invalid_path(
                path.clone(),
                "media file does not exist",
            ));
        }
        if !is_supported_media(path) {
            return Err(SimguardError::invalid_path(
                path.clone(),
                "not a supported media type",
            ));
        }
    }
    Ok(())
}

/// Inject media assets, falling back to the companion-app polyfill when the
/// backend does not support (or rejects) direct injection.
///
/// When the fallback also fails, its failure is the one reported.
pub async fn add_media(
    device: &Device,
    backend: &Arc<dyn DeviceBackend>,
    guard: &TimeoutGuard,
    timeout: Duration,
    paths: Vec<PathBuf>,
) -> Result<()> {
    validate_paths(&paths)?;
    debug!(device = %device.id(), count = paths.len(), "injecting media");

    let operation = Operation::idempotent("add_media", timeout);
    let call_backend = Arc::clone(backend);
    let id = device.id();
    let call_paths = paths.clone();
    let direct = guard
        .execute(&operation, move || async move {
            call_backend.add_media(id, call_paths).await
        })
        .await
        .and_then(|raw| translate::outcome("add_media", raw));

    let failure = match direct {
        Ok(()) => return Ok(()),
        Err(failure) => failure,
    };

    match failure.category() {
        ErrorCategory::UnsupportedOperation | ErrorCategory::BackendRejected => {
            warn!(
                device = %device.id(),
                %failure,
                "direct media injection failed, falling back to companion upload"
            );
        }
        _ => return Err(failure),
    }

    let operation = Operation::idempotent("upload_media_via_companion", timeout);
    let call_backend = Arc::clone(backend);
    let call_paths = paths;
    let result = guard
        .execute(&operation, move || async move {
            call_backend.upload_media_via_companion(id, call_paths).await
        })
        .await
        .and_then(|raw| translate::outcome("upload_media_via_companion", raw));

    if result.is_ok() {
        info!(device = %device.id(), "media injected through companion upload");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, MockDeviceBackend, MockResponse, RawOutcome, CODE_UNSUPPORTED};
    use crate::device::{DeviceId, DeviceState};
    use std::fs::File;
    use tempfile::TempDir;

    fn media_file(dir: &TempDir, name: &str) -> PathBuf {
        let path = dir.path().join(name);
        File::create(&path).unwrap();
        path
    }

    fn booted_device() -> Device {
        Device::new(DeviceId::new(), "test-device", DeviceState::Booted)
    }

    fn unsupported() -> MockResponse {
        MockResponse::Outcome(RawOutcome::failure(Some(BackendError::new(
            "com.backend.media",
            CODE_UNSUPPORTED,
            Some("direct media injection not supported".to_string()),
        ))))
    }

    async fn run(
        backend: &Arc<MockDeviceBackend>,
        device: &Device,
        paths: Vec<PathBuf>,
    ) -> Result<()> {
        let guard = TimeoutGuard::new(true);
        let backend: Arc<dyn DeviceBackend> = Arc::clone(backend) as Arc<dyn DeviceBackend>;
        add_media(device, &backend, &guard, Duration::from_millis(2000), paths).await
    }

    #[test]
    fn test_supported_extensions() {
        assert!(is_supported_media(Path::new("/tmp/a.jpg")));
        assert!(is_supported_media(Path::new("/tmp/a.MOV")));
        assert!(is_supported_media(Path::new("/tmp/a.png")));
        assert!(!is_supported_media(Path::new("/tmp/a.txt")));
        assert!(!is_supported_media(Path::new("/tmp/noextension")));
    }

    #[tokio::test]
    async fn test_nonexistent_path_fails_before_any_backend_call() {
        let backend = Arc::new(MockDeviceBackend::new());
        let device = booted_device();

        let err = run(&backend, &device, vec![PathBuf::from("/nope/missing.mp4")])
            .await
            .unwrap_err();
        assert!(matches!(err, SimguardError::InvalidPath { .. }));
        assert_eq!(backend.calls("add_media"), 0);
        assert_eq!(backend.calls("upload_media_via_companion"), 0);
    }

    #[tokio::test]
    async fn test_unsupported_type_fails_fast() {
        let dir = TempDir::new().unwrap();
        let path = media_file(&dir, "notes.txt");
        let backend = Arc::new(MockDeviceBackend::new());
        let device = booted_device();

        let err = run(&backend, &device, vec![path]).await.unwrap_err();
        assert!(matches!(err, SimguardError::InvalidPath { .. }));
        assert_eq!(backend.calls("add_media"), 0);
    }

    #[tokio::test]
    async fn test_direct_injection_success_skips_fallback() {
        let dir = TempDir::new().unwrap();
        let path = media_file(&dir, "clip.mp4");
        let backend = Arc::new(MockDeviceBackend::new());
        let device = booted_device();

        run(&backend, &device, vec![path]).await.unwrap();
        assert_eq!(backend.calls("add_media"), 1);
        assert_eq!(backend.calls("upload_media_via_companion"), 0);
    }

    #[tokio::test]
    async fn test_unsupported_operation_falls_back_to_polyfill() {
        let dir = TempDir::new().unwrap();
        let path = media_file(&dir, "photo.jpg");
        let backend = Arc::new(MockDeviceBackend::new());
        backend.script("add_media", vec![unsupported()]);
        let device = booted_device();

        run(&backend, &device, vec![path]).await.unwrap();
        assert_eq!(backend.calls("add_media"), 1);
        assert_eq!(backend.calls("upload_media_via_companion"), 1);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = media_file(&dir, "photo.jpg");
        let backend = Arc::new(MockDeviceBackend::new());
        backend.script("add_media", vec![unsupported()]);
        backend.script(
            "upload_media_via_companion",
            vec![MockResponse::Outcome(RawOutcome::failure(Some(
                BackendError::new(
                    "com.backend.media",
                    12,
                    Some("companion app crashed".to_string()),
                ),
            )))],
        );
        let device = booted_device();

        let err = run(&backend, &device, vec![path]).await.unwrap_err();
        assert!(err.to_string().contains("companion app crashed"));
        assert_eq!(backend.calls("upload_media_via_companion"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_does_not_trigger_fallback() {
        let dir = TempDir::new().unwrap();
        let path = media_file(&dir, "photo.jpg");
        let backend = Arc::new(MockDeviceBackend::new());
        backend.script("add_media", vec![MockResponse::Hang]);
        let device = booted_device();

        let err = run(&backend, &device, vec![path]).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::BackendTimeout);
        assert_eq!(backend.calls("upload_media_via_companion"), 0);
    }
}
