use crate::error::{Result, SimguardError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::oneshot;

/// How a spawned or launched process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitStatus {
    /// Normal exit with the given code.
    Exited(i32),
    /// Terminated by the given signal number.
    Signaled(i32),
}

/// Structured termination notification for a spawned process.
///
/// Delivered at most once, on the wrapper's runtime, through the oneshot
/// channel supplied in [`SpawnOptions::termination`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationEvent {
    pub pid: i32,
    pub status: ExitStatus,
}

/// Options for booting a device.
///
/// Recognized keys in the backend payload: `scale` (display scale factor),
/// `locale` (BCP 47 identifier), `headless` (boot without a visible window).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootOptions {
    pub scale: Option<f64>,
    pub locale: Option<String>,
    pub headless: bool,
}

impl BootOptions {
    pub fn validate(&self) -> Result<()> {
        if let Some(scale) = self.scale {
            if !(scale > 0.0 && scale <= 1.0) {
                return Err(SimguardError::rejected(
                    "boot",
                    format!("scale must be within (0, 1], got {scale}"),
                    None,
                ));
            }
        }
        Ok(())
    }

    /// Serialize into the backend's untyped payload, emitting only set keys.
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::Map::new();
        if let Some(scale) = self.scale {
            payload.insert("scale".into(), json!(scale));
        }
        if let Some(locale) = &self.locale {
            payload.insert("locale".into(), json!(locale));
        }
        if self.headless {
            payload.insert("headless".into(), json!(true));
        }
        serde_json::Value::Object(payload)
    }
}

/// Options for installing an application bundle.
///
/// Recognized keys: `allow_reinstall` (replace an existing install of the
/// same identifier instead of failing).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstallOptions {
    pub allow_reinstall: bool,
}

impl InstallOptions {
    pub fn to_payload(&self) -> serde_json::Value {
        json!({ "allow_reinstall": self.allow_reinstall })
    }
}

/// Options for launching an installed application.
///
/// Recognized keys: `arguments`, `environment`, `wait_for_debugger`
/// (suspend at launch until a debugger attaches), `relaunch_if_running`
/// (terminate a running instance first instead of failing).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchOptions {
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub wait_for_debugger: bool,
    pub relaunch_if_running: bool,
}

impl LaunchOptions {
    pub fn validate(&self) -> Result<()> {
        validate_environment("launch", &self.environment)
    }

    pub fn to_payload(&self) -> serde_json::Value {
        json!({
            "arguments": self.arguments,
            "environment": self.environment,
            "wait_for_debugger": self.wait_for_debugger,
            "relaunch_if_running": self.relaunch_if_running,
        })
    }
}

/// Options for spawning an arbitrary binary on the device.
///
/// Recognized payload keys: `arguments`, `environment`, `stdout_path`,
/// `stderr_path` (absolute paths on the host to redirect output to).
/// `termination` never reaches the backend: the wrapper watches the process
/// and delivers a [`TerminationEvent`] through it.
#[derive(Debug, Default)]
pub struct SpawnOptions {
    pub arguments: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
    pub termination: Option<oneshot::Sender<TerminationEvent>>,
}

impl SpawnOptions {
    pub fn validate(&self) -> Result<()> {
        validate_environment("spawn", &self.environment)?;
        for path in [&self.stdout_path, &self.stderr_path].into_iter().flatten() {
            if !path.is_absolute() {
                return Err(SimguardError::invalid_path(
                    path.clone(),
                    "output redirection paths must be absolute",
                ));
            }
        }
        Ok(())
    }

    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::Map::new();
        payload.insert("arguments".into(), json!(self.arguments));
        payload.insert("environment".into(), json!(self.environment));
        if let Some(path) = &self.stdout_path {
            payload.insert("stdout_path".into(), json!(path));
        }
        if let Some(path) = &self.stderr_path {
            payload.insert("stderr_path".into(), json!(path));
        }
        serde_json::Value::Object(payload)
    }
}

fn validate_environment(
    operation: &'static str,
    environment: &BTreeMap<String, String>,
) -> Result<()> {
    for key in environment.keys() {
        if key.is_empty() || key.contains('=') {
            return Err(SimguardError::rejected(
                operation,
                format!("invalid environment variable name {key:?}"),
                None,
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_options_payload_emits_only_set_keys() {
        let payload = BootOptions::default().to_payload();
        assert_eq!(payload, json!({}));

        let payload = BootOptions {
            scale: Some(0.5),
            locale: Some("en_US".to_string()),
            headless: true,
        }
        .to_payload();
        assert_eq!(payload["scale"], json!(0.5));
        assert_eq!(payload["locale"], json!("en_US"));
        assert_eq!(payload["headless"], json!(true));
    }

    #[test]
    fn test_boot_scale_validated() {
        let options = BootOptions {
            scale: Some(1.5),
            ..Default::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_launch_environment_validated() {
        let mut options = LaunchOptions::default();
        options
            .environment
            .insert("BAD=NAME".to_string(), "value".to_string());
        assert!(options.validate().is_err());

        let mut options = LaunchOptions::default();
        options
            .environment
            .insert("GOOD_NAME".to_string(), "value".to_string());
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_spawn_redirection_paths_must_be_absolute() {
        let options = SpawnOptions {
            stdout_path: Some(PathBuf::from("relative/out.log")),
            ..Default::default()
        };
        let err = options.validate().unwrap_err();
        assert!(matches!(err, SimguardError::InvalidPath { .. }));
    }

    #[test]
    fn test_spawn_payload_excludes_termination_channel() {
        let (tx, _rx) = oneshot::channel();
        let options = SpawnOptions {
            arguments: vec!["--flag".to_string()],
            termination: Some(tx),
            ..Default::default()
        };
        let payload = options.to_payload();
        assert_eq!(payload["arguments"], json!(["--flag"]));
        assert!(payload.get("termination").is_none());
    }
}
