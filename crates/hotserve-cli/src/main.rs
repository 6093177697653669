#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::doc_markdown)]

mod commands;
mod coordinator;
mod logging;
mod server;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hotserve")]
#[command(author, version, about = "Serve pages rendered by the freshest server bundle", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Serve requests through the server bundle described by a stats file
    Serve {
        /// Directory the build writes its output to
        #[arg(long, short = 'o', value_name = "DIR", default_value = "dist/server")]
        output: PathBuf,

        /// Stats file rewritten after every build (default: <output>/stats.json)
        #[arg(long, value_name = "FILE")]
        stats: Option<PathBuf>,

        /// Bridge configuration file (JSON)
        #[arg(long, short = 'c', value_name = "FILE")]
        config: Option<PathBuf>,

        /// Chunk whose code asset holds the render function factory
        #[arg(long, value_name = "NAME")]
        chunk_name: Option<String>,

        /// JSON value passed to the render function factory
        #[arg(long, value_name = "JSON")]
        renderer_options: Option<String>,

        /// Port to listen on
        #[arg(long, short = 'p', default_value = "3000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "localhost")]
        host: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(cli.verbose, cli.json);

    let cwd = match &cli.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir().into_diagnostic()?,
    };

    match cli.command {
        None | Some(Commands::Version) => commands::version::run(),
        Some(Commands::Serve {
            output,
            stats,
            config,
            chunk_name,
            renderer_options,
            port,
            host,
        }) => {
            let action = commands::serve::ServeAction {
                output: cwd.join(output),
                stats: stats.map(|stats| cwd.join(stats)),
                config: config.map(|config| cwd.join(config)),
                chunk_name,
                renderer_options,
                port,
                host,
            };

            let span = tracing::info_span!("serve", cmd = "serve", cwd = %cwd.display());
            let _guard = span.enter();

            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::serve::run(action))
        }
    }
}
