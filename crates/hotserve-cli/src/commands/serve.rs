//! `hotserve serve` command implementation.
//!
//! Watches the stats file an external build rewrites after every pass and
//! serves HTTP requests through the render function of the latest bundle.

use crate::coordinator::StatsFileCoordinator;
use crate::server;
use hotserve_core::{BridgeConfig, RenderBridge};
use hotserve_runtime::V8ModuleLoader;
use miette::{miette, IntoDiagnostic, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Serve action.
#[derive(Debug, Clone)]
pub struct ServeAction {
    /// Directory the build writes its output to.
    pub output: PathBuf,
    /// Stats file; defaults to `<output>/stats.json`.
    pub stats: Option<PathBuf>,
    /// Bridge configuration file.
    pub config: Option<PathBuf>,
    /// Overrides the configured chunk name.
    pub chunk_name: Option<String>,
    /// Overrides the configured renderer options (JSON text).
    pub renderer_options: Option<String>,
    pub port: u16,
    pub host: String,
}

impl ServeAction {
    /// Resolve the bridge configuration: file first, flags on top.
    pub fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::from_file(path).into_diagnostic()?,
            None => BridgeConfig::default(),
        };

        if let Some(chunk_name) = &self.chunk_name {
            config = config.with_chunk_name(chunk_name.clone());
        }
        if let Some(options) = &self.renderer_options {
            let options = serde_json::from_str(options)
                .map_err(|e| miette!("invalid --renderer-options: {e}"))?;
            config = config.with_renderer_options(options);
        }

        Ok(config)
    }

    fn stats_path(&self) -> PathBuf {
        self.stats
            .clone()
            .unwrap_or_else(|| self.output.join("stats.json"))
    }
}

pub async fn run(action: ServeAction) -> Result<()> {
    let config = action.bridge_config()?;
    let coordinator = Arc::new(StatsFileCoordinator::new(
        action.output.clone(),
        action.stats_path(),
    ));

    let bridge = RenderBridge::attach(coordinator.as_ref(), V8ModuleLoader::new(), config);

    if coordinator.stats_path().exists() {
        if let Err(e) = coordinator.emit_from_file() {
            warn!(error = %e, "ignoring unreadable stats file");
        }
    } else {
        info!(path = %coordinator.stats_path().display(), "waiting for the first build");
    }

    let watcher = Arc::clone(&coordinator);
    std::thread::Builder::new()
        .name("hotserve-stats-watch".to_string())
        .spawn(move || {
            if let Err(e) = watcher.watch() {
                eprintln!("  Stats watcher error: {:?}", e);
            }
        })
        .into_diagnostic()?;

    let addr: SocketAddr = format!("{}:{}", resolve_host(&action.host), action.port)
        .parse()
        .into_diagnostic()?;

    println!();
    println!(
        "  Render server running at http://{}:{}",
        action.host, action.port
    );
    println!("  Output: {}", action.output.display());
    println!("  Stats:  {}", coordinator.stats_path().display());
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, server::router(bridge))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .into_diagnostic()?;

    Ok(())
}

fn resolve_host(host: &str) -> &str {
    if host == "localhost" {
        "127.0.0.1"
    } else {
        host
    }
}
