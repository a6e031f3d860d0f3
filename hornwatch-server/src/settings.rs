//! Persistent service settings (JSON file in the user data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hornwatch_core::{
    buffering::{OverflowPolicy, DEFAULT_QUEUE_DEPTH},
    inference::DEFAULT_MODEL_PATH,
    EngineConfig, CHUNK_SECONDS, SAMPLE_RATE,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:5000";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Settings {
    pub model_path: PathBuf,
    pub bind_addr: String,
    pub preferred_input_device: Option<String>,
    pub sample_rate: u32,
    pub chunk_seconds: f32,
    pub max_queue_depth: usize,
    pub overflow_policy: OverflowPolicy,
    pub poll_interval_ms: u64,
    pub echo_reports: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            bind_addr: DEFAULT_BIND_ADDR.into(),
            preferred_input_device: None,
            sample_rate: SAMPLE_RATE,
            chunk_seconds: CHUNK_SECONDS,
            max_queue_depth: DEFAULT_QUEUE_DEPTH,
            overflow_policy: OverflowPolicy::default(),
            poll_interval_ms: 100,
            echo_reports: true,
        }
    }
}

impl Settings {
    pub fn normalize(&mut self) {
        if self.model_path.as_os_str().is_empty() {
            self.model_path = PathBuf::from(DEFAULT_MODEL_PATH);
        }
        self.bind_addr = self.bind_addr.trim().to_string();
        if self.bind_addr.is_empty() {
            self.bind_addr = DEFAULT_BIND_ADDR.into();
        }
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        self.sample_rate = self.sample_rate.clamp(8_000, 192_000);
        if !self.chunk_seconds.is_finite() {
            self.chunk_seconds = CHUNK_SECONDS;
        }
        self.chunk_seconds = self.chunk_seconds.clamp(0.25, 10.0);
        self.max_queue_depth = self.max_queue_depth.clamp(1, 256);
        self.poll_interval_ms = self.poll_interval_ms.clamp(10, 5_000);
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            sample_rate: self.sample_rate,
            chunk_seconds: self.chunk_seconds,
            max_queue_depth: self.max_queue_depth,
            overflow_policy: self.overflow_policy,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            preferred_input_device: self.preferred_input_device.clone(),
            echo_reports: self.echo_reports,
            ..EngineConfig::default()
        }
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Hornwatch")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".config")
            })
            .join("hornwatch")
            .join("settings.json")
    }
}

/// Read settings from `path`, falling back to defaults when the file is
/// missing or unreadable.
pub fn load_settings(path: &Path) -> Settings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| match serde_json::from_str::<Settings>(&raw) {
            Ok(s) => Some(s),
            Err(e) => {
                tracing::warn!(path = %path.display(), "ignoring malformed settings file: {e}");
                None
            }
        })
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &Settings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
