use crate::error::{Result, SimguardError};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Identifier for a managed virtual device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for DeviceId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a device as observed through the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    Creating,
    Booted,
    ShuttingDown,
    Shutdown,
    /// The supervising process has ended but the backend still reports a session.
    Zombie,
    Unknown,
}

impl DeviceState {
    /// Whether moving to `next` follows a defined lifecycle edge.
    ///
    /// `Unknown` is reachable from anywhere (observation loss) and can resolve
    /// to anything once the real state is observed again.
    pub fn can_transition_to(self, next: DeviceState) -> bool {
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (DeviceState::Creating, DeviceState::Booted)
                | (DeviceState::Shutdown, DeviceState::Booted)
                | (DeviceState::Booted, DeviceState::ShuttingDown)
                | (DeviceState::ShuttingDown, DeviceState::Shutdown)
                | (DeviceState::ShuttingDown, DeviceState::Zombie)
                | (DeviceState::Zombie, DeviceState::Shutdown)
                | (_, DeviceState::Unknown)
                | (DeviceState::Unknown, _)
        )
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceState::Creating => "creating",
            DeviceState::Booted => "booted",
            DeviceState::ShuttingDown => "shutting-down",
            DeviceState::Shutdown => "shutdown",
            DeviceState::Zombie => "zombie",
            DeviceState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Non-owning handle to a device managed by the lifecycle collaborator.
///
/// The wrapper observes and advances the lifecycle state but never creates or
/// destroys the device itself. Clones share the same underlying state.
#[derive(Clone)]
pub struct Device {
    id: DeviceId,
    name: String,
    state: Arc<RwLock<DeviceState>>,
}

impl Device {
    pub fn new<S: Into<String>>(id: DeviceId, name: S, initial: DeviceState) -> Self {
        Self {
            id,
            name: name.into(),
            state: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DeviceState {
        *self.state.read()
    }

    /// Advance the lifecycle state along a defined edge.
    ///
    /// Returns the previous state. Illegal edges are rejected without
    /// modifying the state.
    pub fn transition(&self, next: DeviceState) -> Result<DeviceState> {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            warn!(
                device = %self.id,
                "rejected illegal state transition {} -> {}",
                current, next
            );
            return Err(SimguardError::IllegalTransition {
                from: current,
                to: next,
            });
        }
        if current != next {
            debug!(device = %self.id, "device state {} -> {}", current, next);
            *state = next;
        }
        Ok(current)
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defined_edges() {
        assert!(DeviceState::Creating.can_transition_to(DeviceState::Booted));
        assert!(DeviceState::Booted.can_transition_to(DeviceState::ShuttingDown));
        assert!(DeviceState::ShuttingDown.can_transition_to(DeviceState::Shutdown));
        assert!(DeviceState::ShuttingDown.can_transition_to(DeviceState::Zombie));
        assert!(DeviceState::Zombie.can_transition_to(DeviceState::Shutdown));
        assert!(DeviceState::Shutdown.can_transition_to(DeviceState::Booted));
    }

    #[test]
    fn test_illegal_edges_rejected() {
        assert!(!DeviceState::Shutdown.can_transition_to(DeviceState::ShuttingDown));
        assert!(!DeviceState::Booted.can_transition_to(DeviceState::Shutdown));
        assert!(!DeviceState::Zombie.can_transition_to(DeviceState::Booted));
        assert!(!DeviceState::Creating.can_transition_to(DeviceState::ShuttingDown));
    }

    #[test]
    fn test_unknown_is_always_reachable() {
        assert!(DeviceState::Booted.can_transition_to(DeviceState::Unknown));
        assert!(DeviceState::Unknown.can_transition_to(DeviceState::Shutdown));
    }

    #[test]
    fn test_device_transition_keeps_state_on_rejection() {
        let device = Device::new(DeviceId::new(), "test-device", DeviceState::Booted);
        let previous = device.transition(DeviceState::ShuttingDown).unwrap();
        assert_eq!(previous, DeviceState::Booted);
        assert_eq!(device.state(), DeviceState::ShuttingDown);

        let err = device.transition(DeviceState::Booted).unwrap_err();
        assert!(matches!(err, SimguardError::IllegalTransition { .. }));
        assert_eq!(device.state(), DeviceState::ShuttingDown);
    }

    #[test]
    fn test_clones_share_state() {
        let device = Device::new(DeviceId::new(), "test-device", DeviceState::Booted);
        let clone = device.clone();
        device.transition(DeviceState::ShuttingDown).unwrap();
        assert_eq!(clone.state(), DeviceState::ShuttingDown);
    }
}
