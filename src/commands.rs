//! CLI Command Handlers
//!
//! Each handler takes parsed CLI args plus [`Output`] and returns an
//! [`ExitCode`]. Session commands funnel every failure through [`fail`].

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::{diagnostic_banner, CreateCmd, ExitCode, InfoCmd, Output, StreamCmd};
use crate::config::Config;
use crate::error::{InputError, OrchestratorError};
use crate::hooks::Hook;
use crate::resolve::{create_torrent, resolve, CreateOptions, InfoReport};
use crate::session::{self, Interrupts, Mode, SessionOptions};
use crate::stream::{PlayerTarget, SelectRequest};
use crate::swarm::{Blocklist, SwarmClient, SwarmOptions};

/// Global flags every handler may need
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub quiet: bool,
    pub verbose: bool,
    pub config: Option<PathBuf>,
}

impl Context {
    /// Config from `--config`, else the default location
    pub fn config(&self) -> anyhow::Result<Config> {
        match &self.config {
            Some(path) => Config::load_from(path),
            None => Ok(Config::load()),
        }
    }
}

// =============================================================================
// Download / Seed Commands
// =============================================================================

pub async fn download_cmd(cmd: StreamCmd, ctx: &Context, output: &Output) -> ExitCode {
    stream_cmd(Mode::Download, cmd, ctx, output).await
}

pub async fn seed_cmd(cmd: StreamCmd, ctx: &Context, output: &Output) -> ExitCode {
    stream_cmd(Mode::Seed, cmd, ctx, output).await
}

async fn stream_cmd(mode: Mode, cmd: StreamCmd, ctx: &Context, output: &Output) -> ExitCode {
    let config = match ctx.config() {
        Ok(config) => config,
        Err(e) => return output.error(format!("{:#}", e), ExitCode::InvalidArgs),
    };
    let engine = config.engine;

    let options = match session_options(&cmd, &config, ctx) {
        Ok(options) => options,
        Err(e) => return fail(e.into(), output, engine.name()),
    };
    // Reject batch misuse before touching the network for a blocklist
    if let Err(e) = options.validate_batch(cmd.inputs.len()) {
        return fail(e.into(), output, engine.name());
    }

    let blocklist_source = cmd.session.blocklist.clone().or(config.blocklist.clone());
    let blocklist = match blocklist_source {
        Some(source) => {
            let mut interrupts = if options.handle_signals {
                Interrupts::os()
            } else {
                Interrupts::none()
            };
            match load_blocklist(&source, &mut interrupts).await {
                Ok(Some(list)) => Some(list),
                Ok(None) => {
                    tracing::info!("interrupted while loading the blocklist");
                    return ExitCode::Success;
                }
                Err(e) => return fail(e.into(), output, engine.name()),
            }
        }
        None => None,
    };

    let client: Arc<dyn SwarmClient> = engine.client(SwarmOptions { blocklist });
    match session::run_batch(client.clone(), mode, &cmd.inputs, options).await {
        Ok(reports) => {
            tracing::debug!(sessions = reports.len(), "batch finished");
            ExitCode::Success
        }
        Err(e) => fail(e, output, client.engine_name()),
    }
}

/// Load a blocklist path or URL. `Ok(None)` when an interrupt arrives first.
pub async fn load_blocklist(
    source: &str,
    interrupts: &mut Interrupts,
) -> Result<Option<Blocklist>, InputError> {
    tokio::select! {
        loaded = Blocklist::load(source) => Ok(Some(loaded?)),
        () = interrupts.recv() => Ok(None),
    }
}

/// Layer command-line flags over the config file
pub fn session_options(
    cmd: &StreamCmd,
    config: &Config,
    ctx: &Context,
) -> Result<SessionOptions, InputError> {
    let args = &cmd.session;
    let mut options = SessionOptions::from_config(config);

    if let Some(port) = args.port {
        options.port = port;
    }
    if let Some(out) = &args.out {
        options.out = Some(out.clone());
    }
    options.announce.extend(args.announce.iter().cloned());
    options.player = cmd.player.target();
    options.select = SelectRequest::from_flag(args.select);
    options.subtitles = args.subtitles.clone();
    // Stats on stdout would corrupt the piped file
    options.quiet = ctx.quiet || options.player == Some(PlayerTarget::Stdout);
    options.verbose = ctx.verbose;
    options.keep_seeding |= args.keep_seeding;
    if args.no_quit {
        options.quit_on_player_exit = false;
    }
    options.sink.not_on_top |= args.not_on_top;

    options.on_done = args
        .on_done
        .as_deref()
        .map(|path| Hook::validate("on-done", path))
        .transpose()?;
    options.on_exit = args
        .on_exit
        .as_deref()
        .map(|path| Hook::validate("on-exit", path))
        .transpose()?;

    Ok(options)
}

/// Report a failure. Unexpected ones get the diagnostic banner.
fn fail(err: OrchestratorError, output: &Output, engine: &str) -> ExitCode {
    let code = output.error(&err, err.exit_code());
    if !err.is_expected() {
        tracing::error!(error = ?err, "session failed");
        eprintln!("{}", diagnostic_banner(engine, code));
    }
    code
}

// =============================================================================
// Create Command
// =============================================================================

pub async fn create_cmd(cmd: CreateCmd, output: &Output) -> ExitCode {
    if !cmd.input.exists() {
        return output.error(InputError::MissingFile(cmd.input), ExitCode::InvalidArgs);
    }

    let options = CreateOptions {
        announce: cmd.announce,
        comment: cmd.comment,
        private: cmd.private,
        piece_length: cmd.piece_length,
        created_by: Some(
            cmd.created_by
                .unwrap_or_else(|| format!("swarmcast/{}", env!("CARGO_PKG_VERSION"))),
        ),
    };

    output.info(format!("Hashing {}...", cmd.input.display()));
    let input = cmd.input.clone();
    let created = match tokio::task::spawn_blocking(move || create_torrent(&input, &options)).await
    {
        Ok(Ok(created)) => created,
        Ok(Err(e)) => {
            return output.error(format!("Could not create torrent: {}", e), ExitCode::Error)
        }
        Err(e) => return output.error(format!("Hashing task failed: {}", e), ExitCode::Error),
    };

    let written = match &cmd.out {
        Some(path) => tokio::fs::write(path, &created.bytes).await,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&created.bytes).and_then(|_| stdout.flush())
        }
    };
    if let Err(e) = written {
        return output.error(format!("Could not write torrent: {}", e), ExitCode::Error);
    }

    if let Some(path) = &cmd.out {
        output.info(format!(
            "Created {} ({}) at {}",
            created.metadata.name,
            created.metadata.info_hash,
            path.display()
        ));
    }
    ExitCode::Success
}

// =============================================================================
// Info Command
// =============================================================================

pub async fn info_cmd(cmd: InfoCmd, output: &Output) -> ExitCode {
    let source = match resolve(&cmd.torrent_id).await {
        Ok(source) => source,
        Err(e) => return fail(e.into(), output, Config::load().engine.name()),
    };
    let report = InfoReport::new(&source);

    match &cmd.out {
        Some(path) => {
            let json = match serde_json::to_string_pretty(&report) {
                Ok(json) => json,
                Err(e) => {
                    return output.error(format!("Failed to serialize: {}", e), ExitCode::Error)
                }
            };
            if let Err(e) = tokio::fs::write(path, json + "\n").await {
                return output.error(
                    format!("Could not write {}: {}", path.display(), e),
                    ExitCode::Error,
                );
            }
        }
        None => {
            if let Err(e) = output.print_json(&report) {
                return output.error(format!("Failed to serialize: {}", e), ExitCode::Error);
            }
        }
    }
    ExitCode::Success
}

// =============================================================================
// Version Command
// =============================================================================

pub fn version_cmd() -> ExitCode {
    println!("{} ({})", env!("CARGO_PKG_VERSION"), Config::load().engine.name());
    ExitCode::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;

    fn stream(args: &[&str]) -> StreamCmd {
        let mut argv = vec!["swarmcast", "download"];
        argv.extend_from_slice(args);
        match Cli::parse_from(argv).command {
            Command::Download(cmd) => cmd,
            other => panic!("Expected Download command, got {:?}", other),
        }
    }

    #[test]
    fn test_flags_override_config() {
        let config = Config {
            port: 9000,
            announce: vec!["udp://config.example:1337".to_string()],
            ..Default::default()
        };
        let cmd = stream(&["x.torrent", "-p", "9100", "-a", "udp://cli.example:80", "--no-quit"]);
        let options = session_options(&cmd, &config, &Context::default()).unwrap();

        assert_eq!(options.port, 9100);
        assert_eq!(
            options.announce,
            vec!["udp://config.example:1337", "udp://cli.example:80"]
        );
        assert!(!options.quit_on_player_exit);
        assert_eq!(options.select, SelectRequest::Auto);
    }

    #[test]
    fn test_config_defaults_survive() {
        let config = Config {
            port: 9000,
            keep_seeding: true,
            ..Default::default()
        };
        let options = session_options(&stream(&["x.torrent"]), &config, &Context::default()).unwrap();
        assert_eq!(options.port, 9000);
        assert!(options.keep_seeding);
        assert!(options.quit_on_player_exit);
    }

    #[test]
    fn test_stdout_forces_quiet() {
        let options = session_options(
            &stream(&["x.torrent", "--stdout"]),
            &Config::default(),
            &Context::default(),
        )
        .unwrap();
        assert!(options.quiet);
        assert_eq!(options.player, Some(PlayerTarget::Stdout));
    }

    #[test]
    fn test_missing_hook_rejected() {
        let result = session_options(
            &stream(&["x.torrent", "--on-done", "/nonexistent/hook.sh"]),
            &Config::default(),
            &Context::default(),
        );
        assert!(matches!(result, Err(InputError::HookMissing(_))));
    }
}
