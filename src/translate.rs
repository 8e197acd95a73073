use crate::backend::{
    BackendError, RawLaunch, RawOutcome, CODE_ALREADY_SHUTDOWN, CODE_NO_ACTIVE_SESSION,
    CODE_UNSUPPORTED,
};
use crate::error::{Result, SimguardError};
use tracing::warn;

/// Normalize the boolean-plus-error-pointer convention.
///
/// The boolean is authoritative. A failure with no error payload gets a
/// synthesized diagnostic; a success that still carries an error payload is
/// treated as backend noise and logged.
pub fn outcome(operation: &'static str, raw: RawOutcome) -> Result<()> {
    match (raw.success, raw.error) {
        (true, None) => Ok(()),
        (true, Some(noise)) => {
            warn!(
                operation,
                error = %noise,
                "backend reported success but still supplied an error payload"
            );
            Ok(())
        }
        (false, error) => Err(classify(operation, error, 0)),
    }
}

/// Normalize the nullable-identifier-plus-error-pointer convention used by
/// launch and spawn. Returns the process identifier on success.
pub fn launch(operation: &'static str, raw: RawLaunch) -> Result<i32> {
    match (raw.pid, raw.error) {
        (Some(pid), error) if pid > 0 => {
            if let Some(noise) = error {
                warn!(
                    operation,
                    pid,
                    error = %noise,
                    "backend returned a process identifier and an error payload"
                );
            }
            Ok(pid)
        }
        (Some(code), error) => Err(classify(operation, error, i64::from(code))),
        (None, Some(error)) => Err(classify(operation, Some(error), -1)),
        (None, None) => Err(SimguardError::inconsistent(
            operation,
            "backend reported neither a process identifier nor an error",
        )),
    }
}

/// Turn an opaque backend error into a categorized diagnostic.
///
/// Guarantee: never silent. Absent payloads and absent messages are both
/// replaced by a diagnostic synthesized from the operation name and return
/// code.
fn classify(
    operation: &'static str,
    error: Option<BackendError>,
    return_code: i64,
) -> SimguardError {
    let Some(error) = error else {
        return SimguardError::unknown(
            operation,
            format!("backend reported failure with no error payload (return code {return_code})"),
            None,
        );
    };

    let message = error
        .message
        .clone()
        .unwrap_or_else(|| format!("backend failure (domain {}, code {})", error.domain, error.code));
    let lowered = message.to_lowercase();
    let underlying = Some(error.to_string());

    if error.code == CODE_NO_ACTIVE_SESSION || lowered.contains("no active session") {
        return SimguardError::zombie(operation, message);
    }
    if error.code == CODE_ALREADY_SHUTDOWN
        || lowered.contains("already shutdown")
        || lowered.contains("current state: shutdown")
    {
        return SimguardError::zombie(operation, message);
    }
    if error.code == CODE_UNSUPPORTED
        || lowered.contains("unsupported")
        || lowered.contains("not supported")
    {
        return SimguardError::unsupported(operation, message);
    }
    if lowered.contains("timed out") || lowered.contains("deadlock") {
        return SimguardError::wedged(operation, message);
    }

    SimguardError::rejected(operation, message, underlying)
}
