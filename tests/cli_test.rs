//! CLI Command Tests
//!
//! Argument parsing, flag layering over the config file, exit codes, and
//! the handlers that finish without a swarm.

// =============================================================================
// CLI Argument Parsing Tests
// =============================================================================

mod cli_parsing {
    use clap::Parser;
    use swarmcast::cli::{Cli, Command};
    use swarmcast::stream::PlayerTarget;

    #[test]
    fn test_seed_command() {
        let cli = Cli::parse_from(["swarmcast", "seed", "./videos", "--keep-seeding"]);
        match cli.command {
            Command::Seed(cmd) => {
                assert_eq!(cmd.inputs, vec!["./videos"]);
                assert!(cmd.session.keep_seeding);
            }
            _ => panic!("Expected Seed command"),
        }
    }

    #[test]
    fn test_download_with_all_session_flags() {
        let cli = Cli::parse_from([
            "swarmcast",
            "download",
            "movie.torrent",
            "--mpv",
            "-o",
            "/tmp/out",
            "-s",
            "1",
            "-t",
            "subs.srt",
            "-p",
            "9000",
            "-b",
            "blocklist.txt",
            "-a",
            "udp://one.example:80",
            "-a",
            "udp://two.example:80",
            "--not-on-top",
            "--no-quit",
            "--on-done",
            "done.sh",
            "--on-exit",
            "exit.sh",
        ]);
        match cli.command {
            Command::Download(cmd) => {
                assert_eq!(cmd.player.target(), Some(PlayerTarget::Mpv));
                let s = &cmd.session;
                assert_eq!(s.out.as_deref(), Some(std::path::Path::new("/tmp/out")));
                assert_eq!(s.select, Some(Some(1)));
                assert_eq!(s.port, Some(9000));
                assert_eq!(s.blocklist.as_deref(), Some("blocklist.txt"));
                assert_eq!(s.announce.len(), 2);
                assert!(s.not_on_top);
                assert!(s.no_quit);
                assert!(s.on_done.is_some());
                assert!(s.on_exit.is_some());
            }
            _ => panic!("Expected Download command"),
        }
    }

    #[test]
    fn test_two_players_conflict() {
        let result = Cli::try_parse_from(["swarmcast", "download", "x.torrent", "--vlc", "--mpv"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_download_requires_input() {
        assert!(Cli::try_parse_from(["swarmcast", "download"]).is_err());
    }

    #[test]
    fn test_chromecast_without_device() {
        let cli = Cli::parse_from(["swarmcast", "download", "x.torrent", "--chromecast"]);
        match cli.command {
            Command::Download(cmd) => assert_eq!(
                cmd.player.target(),
                Some(PlayerTarget::Chromecast { device: None })
            ),
            _ => panic!("Expected Download command"),
        }
    }

    #[test]
    fn test_create_and_info_commands() {
        let cli = Cli::parse_from([
            "swarmcast",
            "create",
            "./videos",
            "-o",
            "videos.torrent",
            "--private",
            "--piece-length",
            "32768",
        ]);
        match cli.command {
            Command::Create(cmd) => {
                assert!(cmd.private);
                assert_eq!(cmd.piece_length, Some(32768));
            }
            _ => panic!("Expected Create command"),
        }

        let cli = Cli::parse_from(["swarmcast", "info", "magnet:?xt=urn:btih:abc"]);
        assert!(matches!(cli.command, Command::Info(_)));
    }
}

// =============================================================================
// Option Layering Tests
// =============================================================================

mod option_layering {
    use clap::Parser;
    use swarmcast::cli::{Cli, Command, StreamCmd};
    use swarmcast::commands::{session_options, Context};
    use swarmcast::config::Config;
    use swarmcast::error::InputError;
    use swarmcast::stream::SelectRequest;

    fn stream(args: &[&str]) -> StreamCmd {
        let mut argv = vec!["swarmcast", "download"];
        argv.extend_from_slice(args);
        match Cli::parse_from(argv).command {
            Command::Download(cmd) => cmd,
            _ => panic!("Expected Download command"),
        }
    }

    #[test]
    fn test_config_file_feeds_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "port = 9500\nkeep_seeding = true\nannounce = [\"udp://cfg.example:1\"]\n",
        )
        .unwrap();

        let ctx = Context {
            config: Some(path),
            ..Default::default()
        };
        let config = ctx.config().unwrap();
        let options = session_options(&stream(&["x.torrent", "-s"]), &config, &ctx).unwrap();
        assert_eq!(options.port, 9500);
        assert!(options.keep_seeding);
        assert_eq!(options.announce, vec!["udp://cfg.example:1"]);
        assert_eq!(options.select, SelectRequest::List);
    }

    #[test]
    fn test_quiet_and_verbose_come_from_globals() {
        let ctx = Context {
            quiet: true,
            verbose: true,
            ..Default::default()
        };
        let options = session_options(&stream(&["x.torrent"]), &Config::default(), &ctx).unwrap();
        assert!(options.quiet);
        assert!(options.verbose);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_executable_hook_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("done.sh");
        std::fs::write(&script, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o644)).unwrap();

        let result = session_options(
            &stream(&["x.torrent", "--on-done", script.to_str().unwrap()]),
            &Config::default(),
            &Context::default(),
        );
        assert!(matches!(result, Err(InputError::HookNotExecutable(_))));
    }
}

// =============================================================================
// Handler Tests
// =============================================================================

mod handlers {
    use clap::Parser;
    use swarmcast::cli::{Cli, Command, ExitCode, Output};
    use swarmcast::commands::{create_cmd, download_cmd, info_cmd, Context};
    use swarmcast::resolve::parse_torrent;

    fn quiet_output() -> Output {
        Output { quiet: true }
    }

    #[tokio::test]
    async fn test_create_then_info_roundtrip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let content = dir.path().join("clip.mp4");
        std::fs::write(&content, vec![3u8; 5000]).unwrap();
        let torrent = dir.path().join("clip.torrent");
        let json = dir.path().join("clip.json");

        let cli = Cli::parse_from([
            "swarmcast",
            "create",
            content.to_str().unwrap(),
            "-o",
            torrent.to_str().unwrap(),
            "--comment",
            "demo",
        ]);
        let Command::Create(cmd) = cli.command else {
            panic!("Expected Create command");
        };
        assert_eq!(create_cmd(cmd, &quiet_output()).await, ExitCode::Success);

        let metadata = parse_torrent(&std::fs::read(&torrent).unwrap()).unwrap();
        assert_eq!(metadata.name, "clip.mp4");
        assert_eq!(metadata.comment.as_deref(), Some("demo"));
        assert!(metadata
            .created_by
            .as_deref()
            .is_some_and(|c| c.starts_with("swarmcast/")));

        let cli = Cli::parse_from([
            "swarmcast",
            "info",
            torrent.to_str().unwrap(),
            "-o",
            json.to_str().unwrap(),
        ]);
        let Command::Info(cmd) = cli.command else {
            panic!("Expected Info command");
        };
        assert_eq!(info_cmd(cmd, &quiet_output()).await, ExitCode::Success);

        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(report["infoHash"], metadata.info_hash.to_hex());
        assert_eq!(report["comment"], "demo");
    }

    #[tokio::test]
    async fn test_create_missing_input() {
        let cli = Cli::parse_from(["swarmcast", "create", "/no/such/folder"]);
        let Command::Create(cmd) = cli.command else {
            panic!("Expected Create command");
        };
        assert_eq!(create_cmd(cmd, &quiet_output()).await, ExitCode::InvalidArgs);
    }

    #[tokio::test]
    async fn test_info_rejects_unknown_identifier() {
        let cli = Cli::parse_from(["swarmcast", "info", "definitely-not-a-torrent"]);
        let Command::Info(cmd) = cli.command else {
            panic!("Expected Info command");
        };
        assert_eq!(info_cmd(cmd, &quiet_output()).await, ExitCode::InvalidArgs);
    }

    #[tokio::test]
    async fn test_batch_with_player_is_invalid_args() {
        let cli = Cli::parse_from([
            "swarmcast",
            "download",
            "a.torrent",
            "b.torrent",
            "c.torrent",
            "--vlc",
        ]);
        let Command::Download(cmd) = cli.command else {
            panic!("Expected Download command");
        };
        let code = download_cmd(cmd, &Context::default(), &quiet_output()).await;
        assert_eq!(code, ExitCode::InvalidArgs);
    }
}
