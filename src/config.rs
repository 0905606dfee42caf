use log::debug;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{FlowError, Result};

const CONFIG_PATHS: [&str; 2] = ["./vdkflow.toml", "./config.toml"];

/// Tuning knobs of the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Sleep between scheduler sweeps in which no pair made progress.
    pub idle_backoff: Duration,
    /// Give up after this many consecutive idle sweeps. `None` waits forever.
    pub stall_limit: Option<u64>,
    /// Frames kept by an audio effector.
    pub audio_frame_pool: usize,
    /// Minimum progress delta between two progress notifications.
    pub progress_step: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_backoff: Duration::from_millis(1),
            stall_limit: None,
            audio_frame_pool: 3,
            progress_step: 0.01,
        }
    }
}

impl EngineConfig {
    /// Defaults, then the first config file found, then `VDKFLOW_*` variables.
    pub fn load() -> Result<Self> {
        let mut config = EngineConfig::default();

        for path in &CONFIG_PATHS {
            if let Ok(content) = fs::read_to_string(path) {
                debug!("loading engine config from {}", path);
                config.apply_str(&content)?;
                break;
            }
        }

        config.apply_env()?;
        Ok(config)
    }

    /// Applies `VDKFLOW_*` environment variables.
    pub fn apply_env(&mut self) -> Result<()> {
        let vars = [
            ("VDKFLOW_IDLE_BACKOFF_MS", "idle_backoff_ms"),
            ("VDKFLOW_STALL_LIMIT", "stall_limit"),
            ("VDKFLOW_AUDIO_FRAME_POOL", "audio_frame_pool"),
            ("VDKFLOW_PROGRESS_STEP", "progress_step"),
        ];
        for (var, key) in vars {
            if let Ok(value) = env::var(var) {
                self.set(key, &value)?;
            }
        }
        Ok(())
    }

    /// Applies `key = value` lines. Blank lines and `#` comments are skipped.
    pub fn apply_str(&mut self, content: &str) -> Result<()> {
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| FlowError::Config(format!("expected key = value, got {:?}", line)))?;
            let value = value.trim().trim_matches('"').trim_matches('\'');
            self.set(key.trim(), value)?;
        }
        Ok(())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "idle_backoff_ms" => self.idle_backoff = Duration::from_millis(value.parse()?),
            "stall_limit" => {
                self.stall_limit = match value {
                    "" | "none" => None,
                    limit => Some(limit.parse()?),
                }
            }
            "audio_frame_pool" => {
                let pool: usize = value.parse()?;
                if pool == 0 {
                    return Err(FlowError::Config("audio_frame_pool must be positive".into()));
                }
                self.audio_frame_pool = pool;
            }
            "progress_step" => {
                self.progress_step = value
                    .parse()
                    .map_err(|_| FlowError::Config(format!("invalid progress_step {:?}", value)))?;
            }
            other => return Err(FlowError::Config(format!("unknown key {:?}", other))),
        }
        Ok(())
    }

    /// Gives up after `limit` sweeps without progress.
    pub fn with_stall_limit(mut self, limit: u64) -> Self {
        self.stall_limit = Some(limit);
        self
    }

    /// Sleep between idle sweeps.
    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }
}

impl FromStr for EngineConfig {
    type Err = FlowError;

    fn from_str(content: &str) -> Result<Self> {
        let mut config = EngineConfig::default();
        config.apply_str(content)?;
        Ok(config)
    }
}

/// Creates a default config template file if it doesn't exist
pub fn write_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# vdkflow engine configuration

# Sleep between scheduler sweeps that moved nothing (milliseconds)
idle_backoff_ms = 1

# Frames kept by the audio effector
audio_frame_pool = 3

# Minimum progress delta between progress notifications
progress_step = 0.01
"#;
        fs::write(path, template)?;
    }
    Ok(())
}
