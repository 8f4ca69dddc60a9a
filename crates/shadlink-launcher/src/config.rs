use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use serde::Deserialize;
use shadlink_proto::{ENV_BASE_GAME, ENV_ENABLE_IPC, ENV_ENABLE_MODS};

const DEFAULT_WRITE_FLUSH_MS: u64 = 1000;
const DEFAULT_GRACEFUL_STOP_MS: u64 = 100;
const DEFAULT_RESTART_DELAY_MS: u64 = 500;
const DEFAULT_LOG_MAX_LINES: usize = 1000;
const DEFAULT_LOG_FILE_MAX_BYTES: u64 = 10 * 1024 * 1024; // 10 MiB
const DEFAULT_LOG_FILE_MAX_FILES: usize = 3;

pub(crate) fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
}

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    pub ipc: IpcConfig,
    pub game: GameConfig,
    pub timeouts: TimeoutConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    pub enabled: bool,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub enable_mods: bool,
    pub base_game_only: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub write_flush_ms: u64,
    pub graceful_stop_ms: u64,
    pub restart_delay_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            write_flush_ms: DEFAULT_WRITE_FLUSH_MS,
            graceful_stop_ms: DEFAULT_GRACEFUL_STOP_MS,
            restart_delay_ms: DEFAULT_RESTART_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Worker lines kept in memory.
    pub max_lines: usize,
    /// Rotated copy of everything relayed from the worker.
    pub console_file: Option<PathBuf>,
    pub file_max_bytes: u64,
    pub file_max_files: usize,
    /// Directory for the launcher's own daily log file.
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_lines: DEFAULT_LOG_MAX_LINES,
            console_file: None,
            file_max_bytes: DEFAULT_LOG_FILE_MAX_BYTES,
            file_max_files: DEFAULT_LOG_FILE_MAX_FILES,
            dir: None,
        }
    }
}

impl LauncherConfig {
    /// Reads the TOML file if one is given, then applies `SHADLINK_*` overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)
                    .with_context(|| format!("read config {}", p.display()))?;
                Self::from_toml(&text).with_context(|| format!("parse config {}", p.display()))?
            }
            None => Self::default(),
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_u64("SHADLINK_WRITE_TIMEOUT_MS") {
            self.timeouts.write_flush_ms = v.clamp(10, 60_000);
        }
        if let Some(v) = env_u64("SHADLINK_STOP_GRACE_MS") {
            self.timeouts.graceful_stop_ms = v.clamp(0, 60_000);
        }
        if let Some(v) = env_u64("SHADLINK_RESTART_DELAY_MS") {
            self.timeouts.restart_delay_ms = v.clamp(0, 60_000);
        }
        if let Some(v) = env_usize("SHADLINK_LOG_MAX_LINES") {
            self.log.max_lines = v.clamp(100, 50_000);
        }
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.write_flush_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.timeouts.graceful_stop_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.timeouts.restart_delay_ms)
    }

    /// Environment flags for a spawned worker. `None` means the variable is removed.
    pub fn spawn_env(&self, ipc_enabled: bool) -> Vec<(&'static str, Option<String>)> {
        let flag = |on: bool| Some(if on { "1" } else { "0" }.to_string());
        vec![
            (ENV_ENABLE_IPC, ipc_enabled.then(|| "true".to_string())),
            (ENV_ENABLE_MODS, flag(self.game.enable_mods)),
            (ENV_BASE_GAME, flag(self.game.base_game_only)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_policy() {
        let cfg = LauncherConfig::default();
        assert!(cfg.ipc.enabled);
        assert_eq!(cfg.write_timeout(), Duration::from_millis(1000));
        assert_eq!(cfg.stop_grace(), Duration::from_millis(100));
        assert_eq!(cfg.restart_delay(), Duration::from_millis(500));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg = LauncherConfig::from_toml(
            r#"
            [game]
            enable_mods = true

            [timeouts]
            graceful_stop_ms = 250
            "#,
        )
        .unwrap();
        assert!(cfg.game.enable_mods);
        assert!(!cfg.game.base_game_only);
        assert_eq!(cfg.timeouts.graceful_stop_ms, 250);
        assert_eq!(cfg.timeouts.restart_delay_ms, DEFAULT_RESTART_DELAY_MS);
        assert_eq!(cfg.log.max_lines, DEFAULT_LOG_MAX_LINES);
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(LauncherConfig::from_toml("[ipc]\nenabled = \"maybe\"").is_err());
    }

    #[test]
    fn spawn_env_flags() {
        let mut cfg = LauncherConfig::default();
        cfg.game.base_game_only = true;

        let env = cfg.spawn_env(true);
        assert_eq!(env[0], (ENV_ENABLE_IPC, Some("true".to_string())));
        assert_eq!(env[1], (ENV_ENABLE_MODS, Some("0".to_string())));
        assert_eq!(env[2], (ENV_BASE_GAME, Some("1".to_string())));

        let env = cfg.spawn_env(false);
        assert_eq!(env[0], (ENV_ENABLE_IPC, None));
    }
}
