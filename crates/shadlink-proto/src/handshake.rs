use std::collections::BTreeMap;

pub const IPC_ENABLED: &str = "#IPC_ENABLED";
pub const IPC_END: &str = "#IPC_END";
pub const ENABLE_PREFIX: &str = "ENABLE_";

/// Optional control features a worker build may or may not understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    MemoryPatch,
    EmuControl,
}

impl Capability {
    /// Every capability the launcher knows how to use.
    pub const ALL: [Capability; 2] = [Capability::MemoryPatch, Capability::EmuControl];

    pub fn key(self) -> &'static str {
        match self {
            Capability::MemoryPatch => "memory_patch",
            Capability::EmuControl => "emu_control",
        }
    }

    /// The handshake frame a worker sends to announce this capability.
    pub fn announce_frame(self) -> String {
        format!("{ENABLE_PREFIX}{}", self.key().to_ascii_uppercase())
    }
}

/// Capability name -> supported. Known capabilities are always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilitySet {
    entries: BTreeMap<String, bool>,
}

impl Default for CapabilitySet {
    fn default() -> Self {
        let entries = Capability::ALL
            .iter()
            .map(|c| (c.key().to_string(), false))
            .collect();
        Self { entries }
    }
}

impl CapabilitySet {
    pub fn supports(&self, cap: Capability) -> bool {
        self.get(cap.key()).unwrap_or(false)
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.entries.get(key).copied()
    }

    pub fn missing(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| !self.supports(*c))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    fn mark(&mut self, key: String) {
        self.entries.insert(key, true);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeEvent {
    /// The frame is not part of a handshake (or arrived after it ended).
    Ignored,
    Started,
    /// A capability was announced; carries the lower-cased key.
    Announced(String),
    Completed { missing: Vec<Capability> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Waiting,
    Collecting,
    Done,
}

/// Tracks one worker's handshake, from `#IPC_ENABLED` to `#IPC_END`.
///
/// The capability set is only readable once the handshake is complete and is
/// never modified afterwards.
#[derive(Debug, Default)]
pub struct Negotiator {
    phase: Phase,
    caps: CapabilitySet,
}

impl Negotiator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, payload: &str) -> HandshakeEvent {
        match self.phase {
            Phase::Waiting if payload == IPC_ENABLED => {
                self.phase = Phase::Collecting;
                HandshakeEvent::Started
            }
            Phase::Collecting if payload == IPC_END => {
                self.phase = Phase::Done;
                HandshakeEvent::Completed {
                    missing: self.caps.missing(),
                }
            }
            Phase::Collecting => match payload.strip_prefix(ENABLE_PREFIX) {
                Some(feature) if !feature.is_empty() => {
                    let key = feature.to_ascii_lowercase();
                    self.caps.mark(key.clone());
                    HandshakeEvent::Announced(key)
                }
                // Other announcements (e.g. SET_ACTIVE_PAD) carry no capability.
                _ => HandshakeEvent::Ignored,
            },
            _ => HandshakeEvent::Ignored,
        }
    }

    #[cfg(test)]
    fn in_progress(&self) -> bool {
        self.phase == Phase::Collecting
    }

    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn capabilities(&self) -> Option<&CapabilitySet> {
        self.is_complete().then_some(&self.caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &[&str] = &[
        "#IPC_ENABLED",
        "ENABLE_MEMORY_PATCH",
        "ENABLE_EMU_CONTROL",
        "SET_ACTIVE_PAD",
        "SET_ACTIVE_CONTROLLER",
        "#IPC_END",
    ];

    fn run(frames: &[&str]) -> (Negotiator, Vec<HandshakeEvent>) {
        let mut n = Negotiator::new();
        let events = frames.iter().map(|f| n.observe(f)).collect();
        (n, events)
    }

    #[test]
    fn full_handshake_marks_everything_supported() {
        let (n, events) = run(FULL);
        let caps = n.capabilities().unwrap();
        assert!(caps.supports(Capability::MemoryPatch));
        assert!(caps.supports(Capability::EmuControl));
        assert_eq!(
            events.last().unwrap(),
            &HandshakeEvent::Completed { missing: vec![] }
        );
    }

    #[test]
    fn bare_handshake_reports_all_missing() {
        let (n, events) = run(&["#IPC_ENABLED", "#IPC_END"]);
        let caps = n.capabilities().unwrap();
        assert_eq!(caps.get("memory_patch"), Some(false));
        assert_eq!(caps.get("emu_control"), Some(false));
        assert_eq!(
            events.last().unwrap(),
            &HandshakeEvent::Completed {
                missing: vec![Capability::MemoryPatch, Capability::EmuControl]
            }
        );
    }

    #[test]
    fn capabilities_hidden_until_end_marker() {
        let (n, _) = run(&FULL[..3]);
        assert!(n.in_progress());
        assert!(n.capabilities().is_none());
    }

    #[test]
    fn frames_after_end_do_not_mutate() {
        let (mut n, _) = run(&["#IPC_ENABLED", "#IPC_END"]);
        assert_eq!(n.observe("ENABLE_MEMORY_PATCH"), HandshakeEvent::Ignored);
        assert_eq!(n.observe("#IPC_ENABLED"), HandshakeEvent::Ignored);
        assert!(!n.capabilities().unwrap().supports(Capability::MemoryPatch));
    }

    #[test]
    fn unknown_features_are_recorded_lowercase() {
        let (n, events) = run(&["#IPC_ENABLED", "ENABLE_FRAME_DUMP", "#IPC_END"]);
        assert_eq!(events[1], HandshakeEvent::Announced("frame_dump".to_string()));
        assert_eq!(n.capabilities().unwrap().get("frame_dump"), Some(true));
    }

    #[test]
    fn enable_before_start_is_ignored() {
        let (n, events) = run(&["ENABLE_MEMORY_PATCH", "#IPC_END"]);
        assert_eq!(events, vec![HandshakeEvent::Ignored, HandshakeEvent::Ignored]);
        assert!(!n.is_complete());
    }

    #[test]
    fn announce_frame_spelling() {
        assert_eq!(Capability::MemoryPatch.announce_frame(), "ENABLE_MEMORY_PATCH");
        assert_eq!(Capability::EmuControl.announce_frame(), "ENABLE_EMU_CONTROL");
    }
}
