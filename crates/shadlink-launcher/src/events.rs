use shadlink_process::SessionId;
use shadlink_proto::{Capability, CapabilitySet};

/// Notifications the supervisor publishes to whoever drives the UI.
///
/// Delivered in the order the underlying transitions happen; each is sent at
/// most once per transition of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LauncherEvent {
    /// The handshake finished and `RUN` was sent.
    WorkerReady {
        session: SessionId,
        capabilities: CapabilitySet,
    },
    CapabilityMissing {
        session: SessionId,
        capability: Capability,
    },
    /// The worker process is gone; the UI should reset its running state.
    ProcessClosed {
        session: SessionId,
        exit_code: Option<i32>,
    },
    /// The worker asked to be relaunched with new arguments.
    RestartRequested {
        session: SessionId,
        args: Vec<String>,
    },
}
