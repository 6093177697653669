//! Turning emitted bundle text into a render function.
//!
//! The actual evaluation mechanism is a [`ModuleLoader`] supplied by the
//! embedder (see the `hotserve-runtime` crate for the V8 one). This module
//! owns the engine-independent part: default-export unwrapping and the
//! `(options) -> (request, response, continuation) -> void` contract checks.

use crate::error::LoadError;
use crate::render::RenderFunction;
use std::path::Path;
use std::sync::Arc;
use tracing::trace;

/// A value produced by evaluating a bundle, or by calling such a value.
pub trait ExportedValue: Sized {
    /// When this value marks itself as a transpiled ES module namespace
    /// (`__esModule`), its `default` member.
    fn es_module_default(&self) -> Option<Self>;

    fn is_callable(&self) -> bool;

    /// Call this value with a single JSON argument.
    fn call(&self, argument: &serde_json::Value) -> Result<Self, LoadError>;

    /// Adopt a callable value as a render function.
    fn into_render_function(self) -> Arc<dyn RenderFunction>;
}

/// Evaluates bundle source text in a fresh global scope.
pub trait ModuleLoader: Send + Sync {
    type Value: ExportedValue;

    /// Evaluate `source` (read from `filename`) and return its top-level export.
    fn evaluate(&self, filename: &Path, source: &str) -> Result<Self::Value, LoadError>;
}

/// Unwrap an ES module namespace to its default export; other values pass through.
pub fn interop_default<V: ExportedValue>(value: V) -> V {
    match value.es_module_default() {
        Some(default) => default,
        None => value,
    }
}

/// Evaluate a server bundle and build its render function.
///
/// The bundle's export must be a factory; the factory is called once with
/// `options` and must return the render function.
pub fn load_render_function<L: ModuleLoader + ?Sized>(
    loader: &L,
    filename: &Path,
    source: &str,
    options: &serde_json::Value,
) -> Result<Arc<dyn RenderFunction>, LoadError> {
    let factory = interop_default(loader.evaluate(filename, source)?);
    if !factory.is_callable() {
        return Err(LoadError::Contract);
    }

    trace!(filename = %filename.display(), "invoking render factory");
    let renderer = factory.call(options)?;
    if !renderer.is_callable() {
        return Err(LoadError::Contract);
    }

    Ok(renderer.into_render_function())
}
