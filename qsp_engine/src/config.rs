use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub sound_enabled: bool,
    /// Tick interval used until the game sets its own.
    pub default_tick_ms: u32,
    /// Directory below the game directory that holds named saves.
    pub saves_dir: String,
    pub strip_html_in_lists: bool,
    /// Upper bound on blocking prompts; unset waits for the user forever.
    pub prompt_timeout_ms: Option<u64>,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            default_tick_ms: 500,
            saves_dir: "saves".to_string(),
            strip_html_in_lists: true,
            prompt_timeout_ms: None,
        }
    }
}

impl PlayerConfig {
    pub fn from_json_file(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading player config from {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing player config {}", path.display()))
    }

    pub fn prompt_timeout(&self) -> Option<Duration> {
        self.prompt_timeout_ms.map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("player.json");
        fs::write(&path, r#"{ "sound_enabled": false, "default_tick_ms": 250 }"#)
            .expect("write config");

        let config = PlayerConfig::from_json_file(Some(&path)).expect("config");
        assert!(!config.sound_enabled);
        assert_eq!(config.default_tick_ms, 250);
        assert_eq!(config.saves_dir, "saves");
        assert_eq!(config.prompt_timeout(), None);
    }

    #[test]
    fn no_path_means_defaults() {
        assert_eq!(
            PlayerConfig::from_json_file(None).expect("defaults"),
            PlayerConfig::default()
        );
    }

    #[test]
    fn malformed_json_is_reported() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").expect("write config");
        let err = PlayerConfig::from_json_file(Some(&path)).expect_err("should fail");
        assert!(format!("{err:#}").contains("parsing player config"));
    }
}
