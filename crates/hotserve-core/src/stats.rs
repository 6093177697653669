//! Per-build statistics emitted by the build coordinator.
//!
//! Mirrors the subset of a bundler's stats JSON the bridge consumes:
//! compilation errors and the assets emitted for each named chunk.

use crate::error::{Error, LoadError};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Extension of the code asset within a chunk.
pub const CODE_EXTENSION: &str = ".js";

/// Statistics for one completed compilation pass.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildStats {
    /// Compilation errors, in the order the build reported them.
    pub errors: Vec<CompilationError>,
    pub warnings: Vec<CompilationError>,
    /// Emitted asset filenames keyed by chunk name.
    pub assets_by_chunk_name: HashMap<String, ChunkAssets>,
    /// Compilation hash, if the build tool reports one.
    pub hash: Option<String>,
}

/// A compilation error as reported by the build tool.
///
/// Older tools emit bare strings, newer ones objects with a `message` field.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CompilationError {
    Text(String),
    #[serde(rename_all = "camelCase")]
    Detailed {
        message: String,
        #[serde(default)]
        module_name: Option<String>,
        #[serde(default)]
        details: Option<String>,
    },
}

impl CompilationError {
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Text(message) | Self::Detailed { message, .. } => message,
        }
    }

    #[must_use]
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Text(_) => None,
            Self::Detailed { details, .. } => details.as_deref(),
        }
    }
}

impl From<&str> for CompilationError {
    fn from(message: &str) -> Self {
        Self::Text(message.to_string())
    }
}

/// Assets emitted for a chunk: one filename, or several when source maps
/// (or other companions) are emitted alongside the code.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ChunkAssets {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for ChunkAssets {
    fn from(name: &str) -> Self {
        Self::One(name.to_string())
    }
}

impl From<Vec<&str>> for ChunkAssets {
    fn from(names: Vec<&str>) -> Self {
        Self::Many(names.into_iter().map(str::to_string).collect())
    }
}

impl BuildStats {
    /// Parse stats from the build tool's JSON output.
    pub fn from_json_str(source: &str) -> Result<Self, Error> {
        serde_json::from_str(source).map_err(Error::StatsParse)
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    #[must_use]
    pub fn first_error(&self) -> Option<&CompilationError> {
        self.errors.first()
    }

    /// Builder used by embedders and tests.
    #[must_use]
    pub fn with_chunk(mut self, chunk: impl Into<String>, assets: impl Into<ChunkAssets>) -> Self {
        self.assets_by_chunk_name.insert(chunk.into(), assets.into());
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: impl Into<CompilationError>) -> Self {
        self.errors.push(error.into());
        self
    }
}

/// Resolve the on-disk (or in-memory) path of a chunk's code asset.
pub fn resolve_artifact_path(
    stats: &BuildStats,
    output_dir: &Path,
    chunk_name: &str,
) -> Result<PathBuf, LoadError> {
    let assets = stats
        .assets_by_chunk_name
        .get(chunk_name)
        .ok_or_else(|| LoadError::ChunkNotFound {
            chunk: chunk_name.to_string(),
        })?;

    let filename = match assets {
        ChunkAssets::One(name) => name,
        ChunkAssets::Many(names) => names
            .iter()
            .find(|name| name.ends_with(CODE_EXTENSION))
            .ok_or_else(|| LoadError::NoCodeAsset {
                chunk: chunk_name.to_string(),
                assets: names.clone(),
            })?,
    };

    Ok(output_dir.join(filename))
}
