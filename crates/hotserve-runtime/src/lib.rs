//! V8 module loader for hotserve.
//!
//! Uses deno_core (V8) to evaluate emitted server bundles. Every bundle runs
//! in its own isolate, with no host module system, so each rebuild yields a
//! fresh render function.
//!
//! ## Usage
//!
//! ```ignore
//! use hotserve_core::{BridgeConfig, RenderBridge};
//! use hotserve_runtime::V8ModuleLoader;
//!
//! let bridge = RenderBridge::attach(&coordinator, V8ModuleLoader::new(), BridgeConfig::default());
//! ```

mod isolate;
mod loader;

pub use isolate::{Isolate, JsErrorReply, NextReply, RenderReply, RuntimeError};
pub use loader::{JsExport, JsRenderFunction, V8ModuleLoader};
