//! A build coordinator driven by a stats file on disk.
//!
//! An external build tool (running in watch mode) rewrites the stats file
//! after every compilation pass; each rewrite is one completion event.

use hotserve_core::{
    BuildCoordinator, BuildStats, DiskFileSystem, DoneListener, ManualCoordinator,
    OutputFileSystem,
};
use miette::{IntoDiagnostic, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const DEBOUNCE: Duration = Duration::from_millis(50);

pub struct StatsFileCoordinator {
    inner: Arc<ManualCoordinator>,
    stats_path: PathBuf,
}

impl StatsFileCoordinator {
    pub fn new(output_path: impl Into<PathBuf>, stats_path: impl Into<PathBuf>) -> Self {
        let fs: Arc<dyn OutputFileSystem> = Arc::new(DiskFileSystem);
        Self {
            inner: Arc::new(ManualCoordinator::new(fs, output_path)),
            stats_path: stats_path.into(),
        }
    }

    pub fn stats_path(&self) -> &Path {
        &self.stats_path
    }

    /// Read the stats file and deliver it as one completion.
    pub fn emit_from_file(&self) -> Result<(), hotserve_core::Error> {
        let source = std::fs::read_to_string(&self.stats_path)?;
        let stats = BuildStats::from_json_str(&source)?;
        debug!(
            path = %self.stats_path.display(),
            errors = stats.errors.len(),
            "build completed"
        );
        self.inner.emit_done(&stats);
        Ok(())
    }

    /// Emit a completion every time the stats file changes.
    ///
    /// Blocks the calling thread until the watcher shuts down.
    pub fn watch(&self) -> Result<()> {
        let dir = self
            .stats_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let (tx, rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(tx, Config::default()).into_diagnostic()?;
        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .into_diagnostic()?;

        let file_name = self.stats_path.file_name();
        let mut pending = false;
        let mut last_change = Instant::now();

        loop {
            match rx.recv_timeout(DEBOUNCE) {
                Ok(Ok(event)) => {
                    let relevant = event.kind.is_create() || event.kind.is_modify();
                    if relevant && event.paths.iter().any(|p| p.file_name() == file_name) {
                        pending = true;
                        last_change = Instant::now();
                    }
                }
                Ok(Err(e)) => warn!(error = %e, "stats watcher error"),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,
            }

            // Build tools often write the stats file in several steps.
            if pending && last_change.elapsed() >= DEBOUNCE {
                pending = false;
                if let Err(e) = self.emit_from_file() {
                    warn!(path = %self.stats_path.display(), error = %e, "ignoring unreadable stats file");
                }
            }
        }

        Ok(())
    }
}

impl BuildCoordinator for StatsFileCoordinator {
    fn output_file_system(&self) -> Arc<dyn OutputFileSystem> {
        self.inner.output_file_system()
    }

    fn output_path(&self) -> PathBuf {
        self.inner.output_path()
    }

    fn on_done(&self, listener: DoneListener) {
        self.inner.on_done(listener);
    }
}
