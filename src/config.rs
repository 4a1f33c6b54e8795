use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::game_log::DEFAULT_LOG_CAPACITY;
use crate::scripting::{
    DEFAULT_RHAI_MAX_ARRAY_SIZE, DEFAULT_RHAI_MAX_CALL_LEVELS, DEFAULT_RHAI_MAX_MAP_SIZE,
    DEFAULT_RHAI_MAX_STRING_SIZE, DEFAULT_SCRIPT_DEADLINE_MS,
};
use crate::upgrades::GameDefinition;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 53;
pub const DEFAULT_FAULT_COOLDOWN_TICKS: u32 = 3;
pub const DEFAULT_AUTOSAVE_INTERVAL_TICKS: u64 = 600;
pub const DEFAULT_CONFIG_PATH: &str = "scriptidle.json";

/// Limits applied to every sandbox engine.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SandboxLimits {
    pub deadline_ms: u64,
    /// Rhai operation cap; 0 leaves the wall-clock deadline as the only bound.
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            deadline_ms: DEFAULT_SCRIPT_DEADLINE_MS,
            max_operations: 0,
            max_call_levels: DEFAULT_RHAI_MAX_CALL_LEVELS,
            max_string_size: DEFAULT_RHAI_MAX_STRING_SIZE,
            max_array_size: DEFAULT_RHAI_MAX_ARRAY_SIZE,
            max_map_size: DEFAULT_RHAI_MAX_MAP_SIZE,
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct GameConfig {
    pub tick_interval_ms: u64,
    pub fault_cooldown_ticks: u32,
    /// Logical ticks between persistence triggers; 0 disables autosave.
    pub autosave_interval_ticks: u64,
    pub log_capacity: usize,
    pub save_path: PathBuf,
    /// Player script file watched for changes.
    pub script_path: Option<PathBuf>,
    pub sandbox: SandboxLimits,
    /// Overrides the embedded game definition when present.
    pub game: Option<GameDefinition>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            fault_cooldown_ticks: DEFAULT_FAULT_COOLDOWN_TICKS,
            autosave_interval_ticks: DEFAULT_AUTOSAVE_INTERVAL_TICKS,
            log_capacity: DEFAULT_LOG_CAPACITY,
            save_path: PathBuf::from("scriptidle.save"),
            script_path: None,
            sandbox: SandboxLimits::default(),
            game: None,
        }
    }
}

impl GameConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Applies `SCRIPTIDLE_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let read_u64 = |name: &str| {
            lookup(name).and_then(|value| value.trim().parse::<u64>().ok())
        };
        if let Some(v) = read_u64("SCRIPTIDLE_TICK_INTERVAL_MS") {
            self.tick_interval_ms = v;
        }
        if let Some(v) = read_u64("SCRIPTIDLE_SCRIPT_DEADLINE_MS") {
            self.sandbox.deadline_ms = v;
        }
        if let Some(v) = read_u64("SCRIPTIDLE_FAULT_COOLDOWN_TICKS") {
            self.fault_cooldown_ticks = v.min(u32::MAX as u64) as u32;
        }
        if let Some(v) = read_u64("SCRIPTIDLE_AUTOSAVE_INTERVAL_TICKS") {
            self.autosave_interval_ticks = v;
        }
        if let Some(v) = read_u64("SCRIPTIDLE_RHAI_MAX_OPERATIONS") {
            self.sandbox.max_operations = v;
        }
        if let Some(v) = read_u64("SCRIPTIDLE_RHAI_MAX_CALL_LEVELS") {
            self.sandbox.max_call_levels = v as usize;
        }
        if let Some(path) = lookup("SCRIPTIDLE_SAVE_PATH").filter(|s| !s.trim().is_empty()) {
            self.save_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("SCRIPTIDLE_SCRIPT_PATH").filter(|s| !s.trim().is_empty()) {
            self.script_path = Some(PathBuf::from(path));
        }
    }

    /// Clamps values that would stall or spin the scheduler.
    pub fn sanitized(mut self) -> Self {
        self.tick_interval_ms = self.tick_interval_ms.max(1);
        self.sandbox.deadline_ms = self.sandbox.deadline_ms.max(1);
        self.sandbox.max_call_levels = self.sandbox.max_call_levels.max(8);
        self.log_capacity = self.log_capacity.max(1);
        self
    }

    pub fn game_definition(&self) -> GameDefinition {
        self.game.clone().unwrap_or_else(GameDefinition::embedded)
    }
}

/// Loads the config named by `SCRIPTIDLE_CONFIG` (or `scriptidle.json`), then
/// applies environment overrides. A missing file silently yields defaults.
pub fn load_config() -> GameConfig {
    let path = std::env::var("SCRIPTIDLE_CONFIG")
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let path = PathBuf::from(path);
    let mut config = if path.exists() {
        match GameConfig::from_file(&path) {
            Ok(cfg) => {
                info!("[scriptidle] Loaded config from {}", path.display());
                cfg
            }
            Err(err) => {
                warn!("[scriptidle] {err}; using defaults");
                GameConfig::default()
            }
        }
    } else {
        GameConfig::default()
    };
    config.apply_env_overrides(|name| std::env::var(name).ok());
    config.sanitized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: GameConfig =
            serde_json::from_str(r#"{ "tick_interval_ms": 530, "sandbox": { "deadline_ms": 250 } }"#)
                .unwrap();
        assert_eq!(config.tick_interval_ms, 530);
        assert_eq!(config.sandbox.deadline_ms, 250);
        assert_eq!(config.sandbox.max_call_levels, DEFAULT_RHAI_MAX_CALL_LEVELS);
        assert_eq!(config.fault_cooldown_ticks, DEFAULT_FAULT_COOLDOWN_TICKS);
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let vars = HashMap::from([
            ("SCRIPTIDLE_TICK_INTERVAL_MS", "530"),
            ("SCRIPTIDLE_SCRIPT_DEADLINE_MS", "not a number"),
            ("SCRIPTIDLE_SCRIPT_PATH", "player.rhai"),
        ]);
        let mut config = GameConfig::default();
        config.apply_env_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.tick_interval_ms, 530);
        assert_eq!(config.sandbox.deadline_ms, DEFAULT_SCRIPT_DEADLINE_MS);
        assert_eq!(config.script_path, Some(PathBuf::from("player.rhai")));
    }

    #[test]
    fn sanitized_clamps_zero_intervals() {
        let mut config = GameConfig::default();
        config.tick_interval_ms = 0;
        config.sandbox.deadline_ms = 0;
        let config = config.sanitized();
        assert_eq!(config.tick_interval_ms, 1);
        assert_eq!(config.sandbox.deadline_ms, 1);
    }

    #[test]
    fn from_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ nope").unwrap();
        let err = GameConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
