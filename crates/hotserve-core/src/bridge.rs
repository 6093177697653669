//! The render bridge: routes requests to the render function exported by the
//! most recent server build.
//!
//! ```text
//! coordinator "done" ──► resolve chunk asset ──► read from output fs
//!                        ──► evaluate ──► unwrap default ──► factory(options)
//!                        ──► swap outcome slot
//!
//! request ──► outcome slot ──► Failed: Next::Error(held error)
//!                          └─► Ready:  render(req, res)
//! ```

use crate::config::BridgeConfig;
use crate::coordinator::BuildCoordinator;
use crate::error::{LoadError, RenderError};
use crate::fs::OutputFileSystem;
use crate::loader::{load_render_function, ModuleLoader};
use crate::render::{Next, RenderFunction, RenderRequest, RenderResponse};
use crate::source_map::{self, SourceMapOptions};
use crate::stats::{resolve_artifact_path, BuildStats};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

type LoadFn = dyn Fn(&Path, &str, &serde_json::Value) -> Result<Arc<dyn RenderFunction>, LoadError>
    + Send
    + Sync;

/// The single piece of state consulted by every request.
#[derive(Default)]
struct Outcome {
    /// Last successfully loaded render function. Kept across failed builds
    /// but unreachable while `error` is set.
    renderer: Option<Arc<dyn RenderFunction>>,
    error: Option<LoadError>,
    /// Number of completed builds observed.
    builds: u64,
}

/// A point-in-time view of the bridge's outcome.
#[derive(Debug, Clone)]
pub enum OutcomeSnapshot {
    /// No build has completed yet.
    Pending,
    /// Requests are routed to the render function loaded by build number `build`.
    Ready { build: u64 },
    /// Requests receive this error.
    Failed { build: u64, error: LoadError },
}

/// Routes requests through the render function of the latest server build.
pub struct RenderBridge {
    config: BridgeConfig,
    fs: Arc<dyn OutputFileSystem>,
    output_path: PathBuf,
    load: Box<LoadFn>,
    outcome: RwLock<Outcome>,
}

impl RenderBridge {
    /// Attach a bridge to `coordinator`.
    ///
    /// Installs the process-wide stack trace translator against the
    /// coordinator's output filesystem and registers one completion listener.
    pub fn attach<C, L>(coordinator: &C, loader: L, config: BridgeConfig) -> Arc<Self>
    where
        C: BuildCoordinator + ?Sized,
        L: ModuleLoader + 'static,
    {
        debug!(chunk = %config.chunk_name, "attaching render bridge");

        let fs = coordinator.output_file_system();
        install_source_map_support(Arc::clone(&fs));

        let bridge = Arc::new(Self::new(coordinator.output_path(), fs, loader, config));
        let listener = Arc::clone(&bridge);
        coordinator.on_done(Box::new(move |stats: &BuildStats| listener.handle_done(stats)));
        bridge
    }

    /// Build a bridge without subscribing it to a coordinator; completions are
    /// delivered by calling [`handle_done`](Self::handle_done) directly.
    pub fn new<L>(
        output_path: impl Into<PathBuf>,
        fs: Arc<dyn OutputFileSystem>,
        loader: L,
        config: BridgeConfig,
    ) -> Self
    where
        L: ModuleLoader + 'static,
    {
        Self {
            config,
            fs,
            output_path: output_path.into(),
            load: Box::new(move |filename: &Path, source: &str, options: &serde_json::Value| {
                load_render_function(&loader, filename, source, options)
            }),
            outcome: RwLock::new(Outcome::default()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// React to a finished build. Never panics or fails: any problem becomes
    /// the held error handed to subsequent requests.
    pub fn handle_done(&self, stats: &BuildStats) {
        let loaded = self.load_build(stats);

        let mut outcome = self.outcome.write().unwrap_or_else(PoisonError::into_inner);
        outcome.builds += 1;
        match loaded {
            Ok(renderer) => {
                info!(build = outcome.builds, "server bundle loaded");
                outcome.renderer = Some(renderer);
                outcome.error = None;
            }
            Err(error) => {
                debug!(build = outcome.builds, %error, "server bundle unavailable");
                outcome.error = Some(error);
            }
        }
    }

    fn load_build(&self, stats: &BuildStats) -> Result<Arc<dyn RenderFunction>, LoadError> {
        if let Some(first) = stats.first_error() {
            warn!(
                errors = stats.errors.len(),
                first = first.message(),
                "server build failed"
            );
            return Err(LoadError::Build {
                message: first.message().to_string(),
                details: first.details().map(str::to_string),
            });
        }

        let path = resolve_artifact_path(stats, &self.output_path, &self.config.chunk_name)?;
        debug!(path = %path.display(), "loading server bundle");

        let bytes = self
            .fs
            .read(&path)
            .map_err(|e| LoadError::artifact_read(&path, e))?;
        let source = String::from_utf8_lossy(&bytes);

        (self.load)(&path, &source, &self.config.renderer_options)
    }

    /// Route one request.
    ///
    /// A held load error is handed to the continuation (`Ok(Next::Error)`)
    /// without touching `res`. Errors escaping the render function itself are
    /// returned as `Err` and left to the caller.
    pub fn dispatch(&self, req: &RenderRequest, res: &mut RenderResponse) -> Result<Next, RenderError> {
        debug!(url = %req.url, "receive request");

        let renderer = {
            let outcome = self.outcome.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(error) = &outcome.error {
                return Ok(Next::Error(error.clone().into()));
            }
            match &outcome.renderer {
                Some(renderer) => Arc::clone(renderer),
                None => return Ok(Next::Error(LoadError::NotReady.into())),
            }
        };

        renderer.render(req, res)
    }

    #[must_use]
    pub fn outcome(&self) -> OutcomeSnapshot {
        let outcome = self.outcome.read().unwrap_or_else(PoisonError::into_inner);
        match (&outcome.error, &outcome.renderer) {
            (Some(error), _) => OutcomeSnapshot::Failed {
                build: outcome.builds,
                error: error.clone(),
            },
            (None, Some(_)) => OutcomeSnapshot::Ready {
                build: outcome.builds,
            },
            (None, None) => OutcomeSnapshot::Pending,
        }
    }
}

/// Map stack traces from evaluated bundles back to sources, re-reading maps
/// from the output filesystem on every translation.
fn install_source_map_support(fs: Arc<dyn OutputFileSystem>) {
    source_map::install(SourceMapOptions {
        empty_cache_between_operations: true,
        retrieve_file: Arc::new(move |path: &Path| fs.read_to_string(path).ok()),
    });
}
