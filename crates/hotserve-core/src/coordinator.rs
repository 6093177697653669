//! Build coordinator abstraction.
//!
//! The coordinator is the external incremental build: it owns the output
//! filesystem and notifies listeners whenever a compilation pass finishes.

use crate::fs::OutputFileSystem;
use crate::stats::BuildStats;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

/// Callback invoked once per finished compilation pass.
pub type DoneListener = Box<dyn Fn(&BuildStats) + Send + Sync>;

/// A build tool that emits per-build completion notifications.
pub trait BuildCoordinator {
    /// Filesystem the build writes its output to.
    fn output_file_system(&self) -> Arc<dyn OutputFileSystem>;

    /// Directory emitted assets are written under.
    fn output_path(&self) -> PathBuf;

    /// Register a listener for completion events.
    fn on_done(&self, listener: DoneListener);
}

/// An in-process coordinator driven by explicit [`emit_done`](Self::emit_done) calls.
///
/// Useful for embedding a build tool that reports completions through some
/// other channel, and for tests.
pub struct ManualCoordinator {
    fs: Arc<dyn OutputFileSystem>,
    output_path: PathBuf,
    listeners: Mutex<Vec<DoneListener>>,
}

impl ManualCoordinator {
    pub fn new(fs: Arc<dyn OutputFileSystem>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            output_path: output_path.into(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Notify every listener, in registration order, that a build finished.
    ///
    /// Completions are serialized: a second call blocks until the first has
    /// been delivered to all listeners.
    pub fn emit_done(&self, stats: &BuildStats) {
        let listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        for listener in listeners.iter() {
            listener(stats);
        }
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl BuildCoordinator for ManualCoordinator {
    fn output_file_system(&self) -> Arc<dyn OutputFileSystem> {
        Arc::clone(&self.fs)
    }

    fn output_path(&self) -> PathBuf {
        self.output_path.clone()
    }

    fn on_done(&self, listener: DoneListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

impl<C: BuildCoordinator + ?Sized> BuildCoordinator for Arc<C> {
    fn output_file_system(&self) -> Arc<dyn OutputFileSystem> {
        (**self).output_file_system()
    }

    fn output_path(&self) -> PathBuf {
        (**self).output_path()
    }

    fn on_done(&self, listener: DoneListener) {
        (**self).on_done(listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MemoryFileSystem;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_emit_reaches_listeners_in_order() {
        let coordinator = ManualCoordinator::new(Arc::new(MemoryFileSystem::new()), "/out");
        let seen = Arc::new(Mutex::new(Vec::new()));

        for id in 0..3 {
            let seen = Arc::clone(&seen);
            coordinator.on_done(Box::new(move |stats: &BuildStats| {
                seen.lock().unwrap().push((id, stats.hash.clone()));
            }));
        }
        assert_eq!(coordinator.listener_count(), 3);

        let stats = BuildStats {
            hash: Some("h1".to_string()),
            ..Default::default()
        };
        coordinator.emit_done(&stats);

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                (0, Some("h1".to_string())),
                (1, Some("h1".to_string())),
                (2, Some("h1".to_string()))
            ]
        );
    }

    #[test]
    fn test_arc_coordinator_delegates() {
        let coordinator = Arc::new(ManualCoordinator::new(
            Arc::new(MemoryFileSystem::new()),
            "/out",
        ));
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        BuildCoordinator::on_done(
            &coordinator,
            Box::new(move |_: &BuildStats| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(BuildCoordinator::output_path(&coordinator), PathBuf::from("/out"));

        coordinator.emit_done(&BuildStats::default());
        coordinator.emit_done(&BuildStats::default());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
