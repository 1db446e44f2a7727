// crates/playback/src/config.rs

use serde::{Deserialize, Serialize};
use std::path::Path;
use talebox_core::{AppError, Result};

/// User-tunable playback behavior, loaded from a TOML file.
///
/// Missing keys fall back to the defaults, so config files only need to
/// name what they change.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// How far skip forward/backward jumps, in seconds
    pub seek_time_secs: u64,
    /// Sleep timer runtime, in minutes
    pub sleep_timer_minutes: u64,
    /// How far playback rewinds when pausing, in seconds
    pub auto_rewind_secs: u64,
    /// Resume playback when headphones come back
    pub resume_on_replug: bool,
    /// Pause instead of ducking on a transient focus loss
    pub pause_on_transient_focus_loss: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            seek_time_secs: 20,
            sleep_timer_minutes: 20,
            auto_rewind_secs: 2,
            resume_on_replug: true,
            pause_on_transient_focus_loss: false,
        }
    }
}

impl PlayerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| AppError::invalid_book(format!("Bad config file: {e}")))
    }

    /// Loads the file if present, otherwise the defaults. A malformed file
    /// is an error; silently discarding user settings would be worse.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| AppError::invalid_book(format!("Cannot serialize config: {e}")))?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = PlayerConfig::default();
        assert_eq!(config.seek_time_secs, 20);
        assert_eq!(config.sleep_timer_minutes, 20);
        assert_eq!(config.auto_rewind_secs, 2);
        assert!(config.resume_on_replug);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let config: PlayerConfig = toml::from_str("seek_time_secs = 30").unwrap();
        assert_eq!(config.seek_time_secs, 30);
        assert_eq!(config.sleep_timer_minutes, 20);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("player.toml");

        let mut config = PlayerConfig::default();
        config.sleep_timer_minutes = 45;
        config.save(&path).unwrap();

        let loaded = PlayerConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.sleep_timer_minutes, 45);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = PlayerConfig::load_or_default(Path::new("/no/such/player.toml")).unwrap();
        assert_eq!(config.seek_time_secs, 20);
    }
}
