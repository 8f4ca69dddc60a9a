use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use shadlink_launcher::{
    ConsoleLog, LauncherConfig, LauncherEvent, ProcessSpawner, Supervisor,
    console::{self, Flow},
};
use shadlink_process::LaunchSpec;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Launch a shadPS4-compatible worker and drive it over its control channel.
///
/// Once the worker is running, commands are read from stdin one per line
/// (pause, resume, start, stop, restart, fullscreen, volume N, fsr on|off,
/// rcas on|off, rcas-att N, inputs CFG, controller GUID, pad IDX ID,
/// patch ..., status, quit).
#[derive(Debug, Parser)]
#[command(name = "shadlink", version)]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Working directory for the worker (defaults to the worker's directory).
    #[arg(long)]
    workdir: Option<PathBuf>,

    /// Do not enable the control channel on the worker.
    #[arg(short = 'I', long = "no-ipc")]
    no_ipc: bool,

    #[arg(long)]
    enable_mods: bool,

    /// Run the base game without updates or DLC.
    #[arg(long)]
    base_game: bool,

    /// Worker executable.
    worker: PathBuf,

    /// Arguments passed through to the worker.
    #[arg(last = true)]
    args: Vec<String>,
}

fn init_tracing(dir: Option<&Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = fmt::layer().with_writer(std::io::stderr).with_target(true);

    match dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "shadlink.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = LauncherConfig::load(cli.config.as_deref())?;
    if cli.no_ipc {
        config.ipc.enabled = false;
    }
    config.game.enable_mods |= cli.enable_mods;
    config.game.base_game_only |= cli.base_game;

    let _log_guard = init_tracing(config.log.dir.as_deref());

    let log = match &config.log.console_file {
        Some(path) => ConsoleLog::with_file(
            config.log.max_lines,
            path.clone(),
            config.log.file_max_bytes,
            config.log.file_max_files,
        )
        .await
        .with_context(|| format!("open console log {}", path.display()))?,
        None => ConsoleLog::new(config.log.max_lines),
    };

    let spec = LaunchSpec {
        workdir: cli
            .workdir
            .clone()
            .or_else(|| cli.worker.parent().map(Path::to_path_buf))
            .filter(|d| !d.as_os_str().is_empty()),
        program: cli.worker,
        args: cli.args,
        ipc_enabled: config.ipc.enabled,
    };

    let (mut sup, mut events) = Supervisor::new(config, ProcessSpawner, log);
    sup.start(spec).await?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            Some(ev) = sup.next_worker_event() => sup.handle_worker_event(ev).await,
            Some(ev) = events.recv() => match ev {
                LauncherEvent::WorkerReady { session, capabilities } => {
                    let caps: Vec<String> = capabilities
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect();
                    tracing::info!(%session, capabilities = %caps.join(","), "worker ready");
                }
                LauncherEvent::CapabilityMissing { session, capability } => {
                    tracing::debug!(%session, capability = capability.key(), "capability missing");
                }
                LauncherEvent::RestartRequested { session, args } => {
                    tracing::info!(%session, ?args, "worker relaunched on request");
                }
                LauncherEvent::ProcessClosed { session, exit_code } => {
                    tracing::info!(%session, ?exit_code, "worker closed");
                    if !sup.is_attached() {
                        break;
                    }
                }
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match console::parse(&line) {
                    Ok(Some(cmd)) => match console::dispatch(&mut sup, cmd).await {
                        Ok(Flow::Quit) => break,
                        Ok(Flow::Continue) => {}
                        Err(err) => tracing::error!(error = %format!("{err:#}"), "command failed"),
                    },
                    Ok(None) => {}
                    Err(err) => tracing::warn!(%err, "invalid command"),
                },
                Ok(None) => {
                    tracing::debug!("stdin closed; console commands disabled");
                    stdin_open = false;
                }
                Err(err) => {
                    tracing::warn!(%err, "stdin read failed; console commands disabled");
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted; stopping worker");
                sup.stop().await;
                break;
            }
        }
    }

    Ok(())
}
