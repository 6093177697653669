#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Hot server-bundle rendering for development servers.
//!
//! A [`RenderBridge`] listens to an incremental build, loads the server
//! bundle each successful build emits, and routes requests through the
//! render function that bundle exports. Failed builds are handed to the
//! request's continuation instead of rendering stale output.

pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fs;
pub mod loader;
pub mod render;
pub mod source_map;
pub mod stats;

pub use bridge::{OutcomeSnapshot, RenderBridge};
pub use config::BridgeConfig;
pub use coordinator::{BuildCoordinator, DoneListener, ManualCoordinator};
pub use error::{Error, LoadError, NextError, RenderError, CONTRACT_MESSAGE};
pub use fs::{DiskFileSystem, MemoryFileSystem, OutputFileSystem};
pub use loader::{interop_default, load_render_function, ExportedValue, ModuleLoader};
pub use render::{Next, RenderFunction, RenderRequest, RenderResponse};
pub use stats::{resolve_artifact_path, BuildStats, ChunkAssets, CompilationError};
