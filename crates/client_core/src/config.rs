use std::{fs, path::Path, time::Duration};

use serde::Deserialize;
use shared::domain::{BoardLayout, ColumnSpec};
use tracing::warn;

pub const DEFAULT_SETTINGS_FILE: &str = "taskboard.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub api_url: String,
    pub request_timeout_secs: u64,
    pub event_buffer: usize,
    pub layout: BoardLayout,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8000/api/".into(),
            request_timeout_secs: 10,
            event_buffer: 256,
            layout: BoardLayout::default(),
        }
    }
}

impl Settings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_url: Option<String>,
    request_timeout_secs: Option<u64>,
    event_buffer: Option<usize>,
    #[serde(default)]
    columns: Vec<ColumnSpec>,
}

pub fn load_settings() -> Settings {
    let mut settings = load_settings_from(Path::new(DEFAULT_SETTINGS_FILE));
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    settings
}

/// Defaults overlaid with `path` when it exists and parses.
pub fn load_settings_from(path: &Path) -> Settings {
    let mut settings = Settings::default();

    let Ok(raw) = fs::read_to_string(path) else {
        return settings;
    };
    let file_cfg = match toml::from_str::<FileSettings>(&raw) {
        Ok(file_cfg) => file_cfg,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "config: ignoring unparsable settings file");
            return settings;
        }
    };

    if let Some(v) = file_cfg.api_url {
        settings.api_url = v;
    }
    if let Some(v) = file_cfg.request_timeout_secs {
        settings.request_timeout_secs = v;
    }
    if let Some(v) = file_cfg.event_buffer {
        settings.event_buffer = v;
    }
    if !file_cfg.columns.is_empty() {
        settings.layout = BoardLayout::new(file_cfg.columns);
    }

    settings
}

pub fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("TASKBOARD_API_URL") {
        settings.api_url = v;
    }
    if let Some(v) = lookup("APP__API_URL") {
        settings.api_url = v;
    }

    if let Some(v) = lookup("APP__REQUEST_TIMEOUT_SECS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.request_timeout_secs = parsed;
        }
    }

    if let Some(v) = lookup("APP__EVENT_BUFFER") {
        if let Ok(parsed) = v.parse::<usize>() {
            settings.event_buffer = parsed.max(1);
        }
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
