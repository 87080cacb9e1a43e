// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Player configuration.
//!
//! The configuration is a YAML document with a `settings` group and a
//! `sounds` group mapping decimal note numbers to sample filenames
//! relative to the resource directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Default global volume (percent).
const DEFAULT_VOLUME: u8 = 100;

/// Default MIDI input device id.
const DEFAULT_INPUT_DEVICE_ID: usize = 3;

/// Default maximum number of concurrent voices.
pub const DEFAULT_MAX_VOICES: u32 = 32;

/// Default directory holding the sample files.
const DEFAULT_RESOURCE_DIR: &str = "resources";

/// Typed error for config load/parse failures so callers can distinguish
/// e.g. file-not-found from parse errors without string matching.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yml::Error,
    },
    #[error("invalid {field}: {reason}")]
    Invalid { field: String, reason: String },
}

/// A YAML representation of the player configuration.
#[derive(Deserialize, Clone, Debug, Default)]
pub struct Config {
    /// The settings group.
    #[serde(default)]
    settings: Settings,

    /// Mapping from decimal note number to sample filename. The filename
    /// "-1" marks a note as unmapped.
    #[serde(default)]
    sounds: HashMap<String, String>,
}

/// A YAML representation of the settings group.
#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    /// Global volume, 0-100.
    #[serde(default = "default_volume")]
    volume: u8,

    /// Whether note velocity scales the per-voice volume. When disabled,
    /// every hit plays at full velocity.
    #[serde(default = "default_adaptive_volume")]
    adaptive_volume: bool,

    /// The id of the MIDI input device to read from.
    #[serde(default = "default_input_device_id")]
    input_device_id: usize,

    /// Maximum number of concurrent voices.
    #[serde(default = "default_max_voices")]
    max_voices: u32,

    /// What to do when a trigger arrives while the pool is full.
    #[serde(default)]
    overflow: OverflowPolicy,

    /// The directory holding the sample files.
    #[serde(default = "default_resource_dir")]
    resource_dir: PathBuf,
}

/// Behavior when a trigger arrives while the voice pool is at capacity.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Unlink the least recently triggered voice and reuse its slot.
    #[default]
    EvictOldest,
    /// Reject the new trigger.
    RejectNew,
}

fn default_volume() -> u8 {
    DEFAULT_VOLUME
}

fn default_adaptive_volume() -> bool {
    true
}

fn default_input_device_id() -> usize {
    DEFAULT_INPUT_DEVICE_ID
}

fn default_max_voices() -> u32 {
    DEFAULT_MAX_VOICES
}

fn default_resource_dir() -> PathBuf {
    PathBuf::from(DEFAULT_RESOURCE_DIR)
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            volume: default_volume(),
            adaptive_volume: default_adaptive_volume(),
            input_device_id: default_input_device_id(),
            max_voices: default_max_voices(),
            overflow: OverflowPolicy::default(),
            resource_dir: default_resource_dir(),
        }
    }
}

impl Config {
    /// Loads and validates the configuration from the given file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_yml::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parses and validates the configuration from a YAML string.
    pub fn parse(contents: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_yml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.settings.volume > 100 {
            return Err(ConfigError::Invalid {
                field: "settings.volume".to_string(),
                reason: format!("{} is not in 0-100", self.settings.volume),
            });
        }
        Ok(())
    }

    /// Returns the global volume as a fraction in [0, 1].
    pub fn global_volume(&self) -> f32 {
        f32::from(self.settings.volume) / 100.0
    }

    /// Returns whether note velocity scales the per-voice volume.
    pub fn adaptive_volume(&self) -> bool {
        self.settings.adaptive_volume
    }

    /// Returns the id of the MIDI input device to read from.
    pub fn input_device_id(&self) -> usize {
        self.settings.input_device_id
    }

    /// Returns the maximum number of concurrent voices.
    pub fn max_voices(&self) -> u32 {
        self.settings.max_voices
    }

    /// Returns the pool overflow policy.
    pub fn overflow(&self) -> OverflowPolicy {
        self.settings.overflow
    }

    /// Returns the directory holding the sample files.
    pub fn resource_dir(&self) -> &Path {
        &self.settings.resource_dir
    }

    /// Returns the note number to sample filename mapping.
    pub fn sounds(&self) -> &HashMap<String, String> {
        &self.sounds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse("{}").unwrap();

        assert_eq!(config.global_volume(), 1.0);
        assert!(config.adaptive_volume());
        assert_eq!(config.input_device_id(), 3);
        assert_eq!(config.max_voices(), DEFAULT_MAX_VOICES);
        assert_eq!(config.overflow(), OverflowPolicy::EvictOldest);
        assert_eq!(config.resource_dir(), Path::new("resources"));
        assert!(config.sounds().is_empty());
    }

    #[test]
    fn test_parse_full() {
        let config = Config::parse(
            r#"
settings:
  volume: 80
  adaptive-volume: false
  input-device-id: 1
  max-voices: 8
  overflow: reject-new
  resource-dir: /srv/pads
sounds:
  "60": kick.wav
  "61": snare.wav
  "62": "-1"
"#,
        )
        .unwrap();

        assert!((config.global_volume() - 0.8).abs() < f32::EPSILON);
        assert!(!config.adaptive_volume());
        assert_eq!(config.input_device_id(), 1);
        assert_eq!(config.max_voices(), 8);
        assert_eq!(config.overflow(), OverflowPolicy::RejectNew);
        assert_eq!(config.resource_dir(), Path::new("/srv/pads"));
        assert_eq!(config.sounds().len(), 3);
        assert_eq!(config.sounds()["62"], "-1");
    }

    #[test]
    fn test_volume_out_of_range() {
        let err = Config::parse("settings:\n  volume: 101\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_malformed_document() {
        let err = Config::parse("settings: [not, a, map]").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/mpad.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
