use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    downsampler::{DownsampleStrategy, PreviewParams},
    enums::{AutoWindow, Interpolation, SortBy, ViewLayout},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Viewer settings. Every field has a default, so a config file only needs
/// to name what it changes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub sort_by: SortBy,
    pub layout: ViewLayout,
    pub auto_window: AutoWindow,
    pub interpolation: Interpolation,
    pub preview: DownsampleStrategy,
    pub preview_params: PreviewParams,
}

impl ViewerConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
