//! Playback configuration
//!
//! Settings are plain serde data so hosts can ship them as JSON next to the
//! plugin binary. Missing fields fall back to [`PlaybackConfig::default`].

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::PlaybackError;

/// Largest 2D texture dimension guaranteed by D3D11 feature level 11_0
pub const D3D11_MAX_TEXTURE_DIMENSION: u32 = 16384;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Name attached to the exported NT handle (unnamed when `None`)
    pub shared_handle_name: Option<String>,
    /// Start playback as soon as a source finishes opening
    pub auto_play: bool,
    /// Restart from the beginning when the source ends
    pub looping: bool,
    /// Rate applied to the session at initialization
    pub initial_playback_rate: f64,
    /// Upper bound for either dimension of a playback texture
    pub max_texture_dimension: u32,
    /// Default filter for [`crate::init_logging`]
    pub log_filter: String,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            shared_handle_name: None,
            auto_play: false,
            looping: false,
            initial_playback_rate: 1.0,
            max_texture_dimension: D3D11_MAX_TEXTURE_DIMENSION,
            log_filter: "info".to_string(),
        }
    }
}

impl PlaybackConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).context("Failed to parse playback config")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read playback config {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn validate(&self) -> std::result::Result<(), PlaybackError> {
        if !self.initial_playback_rate.is_finite() || self.initial_playback_rate <= 0.0 {
            return Err(PlaybackError::InvalidArgument(format!(
                "initial_playback_rate must be a positive finite number, got {}",
                self.initial_playback_rate
            )));
        }
        if self.max_texture_dimension == 0 || self.max_texture_dimension > D3D11_MAX_TEXTURE_DIMENSION
        {
            return Err(PlaybackError::InvalidArgument(format!(
                "max_texture_dimension must be within 1..={}, got {}",
                D3D11_MAX_TEXTURE_DIMENSION, self.max_texture_dimension
            )));
        }
        if let Some(name) = &self.shared_handle_name {
            if name.is_empty() || name.contains('\\') {
                return Err(PlaybackError::InvalidArgument(format!(
                    "shared_handle_name {:?} is not a valid object name",
                    name
                )));
            }
        }
        Ok(())
    }
}
