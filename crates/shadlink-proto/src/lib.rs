// Line-oriented control protocol spoken between the launcher and the worker.
//
// Everything in this crate is pure: byte buffers in, typed values out. Pipes,
// processes and timeouts live in the launcher and worker crates.

pub mod command;
pub mod frame;
pub mod handshake;
pub mod restart;

pub use command::{Command, DecodeError, MemoryPatch, PatchMask};
pub use frame::{Channel, Line, LineFramer, encode_frame};
pub use handshake::{Capability, CapabilitySet, HandshakeEvent, Negotiator};
pub use restart::{RestartAccumulator, RestartFrameError, RestartProgress};

/// Prefix that marks a worker output line as a control frame.
pub const CONTROL_PREFIX: char = ';';

/// Set to `true` in the worker's environment to enable the control channel.
pub const ENV_ENABLE_IPC: &str = "SHADPS4_ENABLE_IPC";
/// `1`/`0`: mount the mods folder.
pub const ENV_ENABLE_MODS: &str = "SHADPS4_ENABLE_MODS";
/// `1`/`0`: ignore game-specific patches and updates.
pub const ENV_BASE_GAME: &str = "SHADPS4_BASE_GAME";

/// Returns the payload of a control frame, or `None` for a plain log line.
pub fn control_payload(line: &str) -> Option<&str> {
    line.strip_prefix(CONTROL_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_payload_strips_prefix() {
        assert_eq!(control_payload(";#IPC_END"), Some("#IPC_END"));
        assert_eq!(control_payload(";"), Some(""));
        assert_eq!(control_payload("[Core] <Info> boot"), None);
        assert_eq!(control_payload(" ;RESTART"), None);
    }
}
