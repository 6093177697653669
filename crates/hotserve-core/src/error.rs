use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Message used whenever a server bundle does not export a render factory.
pub const CONTRACT_MESSAGE: &str = "the server artifact must export a function of the form \
     (options) -> (request, response, continuation) -> void";

/// Core error type for hotserve operations outside the request path.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[source] serde_json::Error),

    #[error("Failed to parse build stats: {0}")]
    StatsParse(#[source] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}

/// An error captured while turning a finished build into a render function.
///
/// The bridge holds at most one of these and hands a clone to every request
/// until a later build succeeds, so it must be cheap to clone.
#[derive(Error, Debug, Clone)]
pub enum LoadError {
    /// The build itself reported compilation errors; carries the first one verbatim.
    #[error("{message}")]
    Build {
        message: String,
        details: Option<String>,
    },

    /// No build has completed yet.
    #[error("no server build has completed yet")]
    NotReady,

    #[error("chunk `{chunk}` was not emitted by the server build")]
    ChunkNotFound { chunk: String },

    #[error("chunk `{chunk}` has no `.js` asset among {assets:?}")]
    NoCodeAsset { chunk: String, assets: Vec<String> },

    #[error("failed to read server artifact {}: {source}", path.display())]
    ArtifactRead {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("{}", CONTRACT_MESSAGE)]
    Contract,

    /// Evaluating the artifact or invoking its factory threw.
    #[error("{message}")]
    Evaluate {
        message: String,
        stack: Option<String>,
    },
}

impl LoadError {
    pub fn artifact_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ArtifactRead {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// The stack trace attached to this error, if the loader produced one.
    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::Evaluate { stack, .. } => stack.as_deref(),
            Self::Build { details, .. } => details.as_deref(),
            _ => None,
        }
    }
}

/// An error the render function passed to its continuation (`next(err)`).
#[derive(Error, Debug, Clone)]
pub enum NextError {
    /// The last build could not be loaded; every request receives this.
    #[error(transparent)]
    Load(#[from] LoadError),

    /// The render function reported its own failure.
    #[error("{message}")]
    Renderer {
        message: String,
        stack: Option<String>,
    },
}

impl NextError {
    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::Load(err) => err.stack(),
            Self::Renderer { stack, .. } => stack.as_deref(),
        }
    }
}

/// A failure escaping the render function itself.
///
/// The bridge never intercepts these; the HTTP host decides what to do with them.
#[derive(Error, Debug)]
pub enum RenderError {
    /// The render function threw synchronously.
    #[error("render function threw: {message}")]
    Threw {
        message: String,
        stack: Option<String>,
    },

    /// The render function returned without ending the response or calling `next`.
    #[error("render function neither ended the response nor called next for {url}")]
    Unfinished { url: String },

    /// The isolate hosting the render function is gone.
    #[error("render worker unavailable: {0}")]
    Worker(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_error_displays_verbatim() {
        let err = LoadError::Build {
            message: "syntax error".to_string(),
            details: None,
        };
        assert_eq!(err.to_string(), "syntax error");
    }

    #[test]
    fn test_contract_message_is_fixed() {
        assert_eq!(LoadError::Contract.to_string(), CONTRACT_MESSAGE);
    }

    #[test]
    fn test_next_error_is_transparent_over_load_errors() {
        let err = NextError::from(LoadError::Evaluate {
            message: "ReferenceError: x is not defined".to_string(),
            stack: Some("at /out/main.js:1:1".to_string()),
        });
        assert_eq!(err.to_string(), "ReferenceError: x is not defined");
        assert_eq!(err.stack(), Some("at /out/main.js:1:1"));
    }
}
