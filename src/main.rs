//! swarmcast - stream torrents to your media player or TV
//!
//! # Usage
//!
//! ```bash
//! swarmcast download "magnet:?xt=urn:btih:..." --vlc
//! swarmcast seed ./videos
//! swarmcast info movie.torrent
//! ```

use clap::Parser;
use tracing_subscriber::EnvFilter;

use swarmcast::cli::{Cli, Command, ExitCode, Output};
use swarmcast::commands::{self, Context};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = run_cli(cli).await;
    std::process::exit(exit_code.into());
}

/// Logs go to stderr so they never mix with streamed data on stdout.
/// `RUST_LOG` wins over `--verbose`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "swarmcast=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}

/// Run CLI command and return exit code
async fn run_cli(cli: Cli) -> ExitCode {
    let output = Output::new(&cli);
    let ctx = Context {
        quiet: cli.quiet,
        verbose: cli.verbose,
        config: cli.config.clone(),
    };

    match cli.command {
        Command::Download(cmd) => commands::download_cmd(cmd, &ctx, &output).await,
        Command::Seed(cmd) => commands::seed_cmd(cmd, &ctx, &output).await,
        Command::Create(cmd) => commands::create_cmd(cmd, &output).await,
        Command::Info(cmd) => commands::info_cmd(cmd, &output).await,
        Command::Version => commands::version_cmd(),
    }
}
