//! Engine Configuration
//!
//! One JSON document; every section and key is optional.
//!
//! ```json
//! { "template": { "anchorsLayer": "anchors" },
//!   "codec": { "pruneAfterDays": 365 },
//!   "batch": { "workers": 4 } }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::codec::CodecConfig;
use crate::pipeline::BatchConfig;
use crate::templates::TemplateConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {}: {source}", path.display())]
    Io { path: PathBuf, source: std::io::Error },

    #[error("Invalid config {}: {source}", path.display())]
    Parse { path: PathBuf, source: serde_json::Error },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default)]
    pub template: TemplateConfig,
    #[serde(default)]
    pub codec: CodecConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        serde_json::from_str(&raw)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }
}
