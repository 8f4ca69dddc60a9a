use shadlink_proto::{ENV_BASE_GAME, ENV_ENABLE_IPC, ENV_ENABLE_MODS};

/// Flags the launcher passes to a worker through its environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WorkerEnv {
    pub ipc_enabled: bool,
    pub enable_mods: bool,
    pub base_game_only: bool,
}

impl WorkerEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| lookup(name).is_some_and(|v| v.trim() == "1");
        Self {
            ipc_enabled: lookup(ENV_ENABLE_IPC).is_some_and(|v| v.trim() == "true"),
            enable_mods: flag(ENV_ENABLE_MODS),
            base_game_only: flag(ENV_BASE_GAME),
        }
    }
}
