//! Bridge configuration.
//!
//! ## Config file format
//!
//! ```json
//! {
//!   "chunkName": "main",
//!   "serverRendererOptions": { "title": "My app" }
//! }
//! ```

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default name of the server chunk.
pub const DEFAULT_CHUNK_NAME: &str = "main";

/// Immutable configuration for a [`RenderBridge`](crate::RenderBridge).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    /// Name of the server chunk whose code asset is loaded after each build.
    pub chunk_name: String,

    /// Options handed unchanged to the bundle's render factory.
    #[serde(rename = "serverRendererOptions", alias = "rendererOptions")]
    pub renderer_options: serde_json::Value,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            chunk_name: DEFAULT_CHUNK_NAME.to_string(),
            renderer_options: serde_json::Value::Object(serde_json::Map::new()),
        }
    }
}

impl BridgeConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_chunk_name(mut self, chunk_name: impl Into<String>) -> Self {
        self.chunk_name = chunk_name.into();
        self
    }

    #[must_use]
    pub fn with_renderer_options(mut self, options: serde_json::Value) -> Self {
        self.renderer_options = options;
        self
    }

    /// Parse a config from JSON text. Missing keys take their defaults.
    pub fn from_json_str(source: &str) -> Result<Self, Error> {
        serde_json::from_str(source).map_err(Error::ConfigParse)
    }

    /// Load a config from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let source = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&source)
    }
}
