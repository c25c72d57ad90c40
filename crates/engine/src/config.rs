// pyreplay - Python Execution Replay
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Engine configuration.
//!
//! Every section has sensible defaults, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! [recorder]
//! max_steps = 2000
//!
//! [replay]
//! max_rows = 8
//! ```

use std::{fs, path::Path};

use pyreplay_common::types::{RecordingLimits, DEFAULT_MAX_STEPS, MAIN_FILE};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or written
    #[error("failed to access config file {path}: {source}")]
    Io {
        /// Path of the config file
        path: String,
        /// Underlying error
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`EngineConfig`]
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path of the config file
        path: String,
        /// Underlying error
        source: toml::de::Error,
    },

    /// The configuration could not be serialized
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level configuration of a debug session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Recorder settings
    pub recorder: RecorderConfig,
    /// Replay and display settings
    pub replay: ReplayConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.display().to_string(), source })?;
        let config = Self::from_toml(&content)
            .map_err(|source| ConfigError::Parse { path: path.display().to_string(), source })?;
        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize configuration to TOML text
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Set the recorder section
    pub fn with_recorder(mut self, recorder: RecorderConfig) -> Self {
        self.recorder = recorder;
        self
    }

    /// Set the replay section
    pub fn with_replay(mut self, replay: ReplayConfig) -> Self {
        self.replay = replay;
        self
    }
}

/// Settings of the execution recorder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Whether recording is enabled at all
    pub enabled: bool,
    /// Recording stops once this many steps were stored
    pub max_steps: usize,
    /// How many recent steps are compared when dropping duplicates
    pub duplicate_lookback: usize,
    /// How far back a new value may be copied onto an earlier step
    pub backfill_lookback: usize,
    /// How far ahead the post pass looks for missing assigned values
    pub forward_lookahead: usize,
    /// Build analysis maps on a background thread
    pub background_analysis: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_steps: DEFAULT_MAX_STEPS,
            duplicate_lookback: 5,
            backfill_lookback: 3,
            forward_lookahead: 5,
            background_analysis: true,
        }
    }
}

impl RecorderConfig {
    /// Enable or disable recording
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the step ceiling
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Build analysis maps on the calling thread instead of a background thread
    pub fn with_background_analysis(mut self, background: bool) -> Self {
        self.background_analysis = background;
        self
    }

    /// Recording limits derived from this configuration
    pub fn limits(&self) -> RecordingLimits {
        RecordingLimits { max_steps: self.max_steps }
    }
}

/// Settings of the replay engine and the line decorator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Maximum variable rows shown next to a line
    pub max_rows: usize,
    /// Width of the editor viewport in pixels
    pub editor_width_px: f64,
    /// Width of one character in pixels
    pub char_width_px: f64,
    /// Width of the gutter in pixels
    pub gutter_px: f64,
    /// Characters kept between the end of the line and the decoration
    pub padding_chars: usize,
    /// Lower bound of the characters available to a decoration
    pub min_chars: usize,
    /// File shown for trace steps whose file is not a Python source
    pub main_file: String,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            max_rows: 10,
            editor_width_px: 800.0,
            char_width_px: 8.0,
            gutter_px: 48.0,
            padding_chars: 4,
            min_chars: 20,
            main_file: MAIN_FILE.to_string(),
        }
    }
}

impl ReplayConfig {
    /// Set the row cap
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    /// Set the editor geometry in pixels
    pub fn with_editor_geometry(
        mut self,
        width_px: f64,
        char_width_px: f64,
        gutter_px: f64,
    ) -> Self {
        self.editor_width_px = width_px;
        self.char_width_px = char_width_px;
        self.gutter_px = gutter_px;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.recorder.max_steps, 1000);
        assert_eq!(config.replay.max_rows, 10);
    }

    #[test]
    fn test_partial_toml() {
        let config = EngineConfig::from_toml("[recorder]\nmax_steps = 50\n").unwrap();
        assert_eq!(config.recorder.max_steps, 50);
        assert_eq!(config.recorder.duplicate_lookback, 5);
        assert_eq!(config.replay, ReplayConfig::default());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = EngineConfig::default()
            .with_recorder(RecorderConfig::default().with_max_steps(7).with_enabled(false));
        let text = config.to_toml().unwrap();
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), config);
    }
}
