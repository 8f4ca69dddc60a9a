//! A minimal worker that speaks the launcher protocol. It emulates nothing:
//! it announces itself, logs what it is told to do and exits on `STOP`.

use std::{
    io::BufReader,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::Context;
use shadlink_proto::Capability;
use shadlink_worker::{ControlError, ControlWriter, WorkerAction, WorkerEnv, WorkerLogFormat};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

const FRAME_INTERVAL: Duration = Duration::from_millis(250);

/// Arguments the stub asks to be relaunched with when told to restart.
const RESTART_ARGS: [&str; 1] = ["--restarted"];

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(WorkerLogFormat { ansi: true })
        .with_writer(std::io::stdout)
        .init();
}

struct Engine {
    running: Arc<AtomicBool>,
    paused: bool,
    frames: u64,
}

impl Engine {
    fn begin(&mut self) {
        if !self.running.swap(true, Ordering::AcqRel) {
            tracing::info!(target: "Core", "game started");
        }
    }

    /// Returns `false` once the worker should exit.
    fn apply(&mut self, action: WorkerAction) -> anyhow::Result<bool> {
        match action {
            WorkerAction::Start | WorkerAction::Run => self.begin(),
            WorkerAction::TogglePause => {
                self.paused = !self.paused;
                tracing::info!(target: "Core", "{}", if self.paused { "paused" } else { "resumed" });
            }
            WorkerAction::Stop => {
                tracing::info!(target: "Core", "stopping");
                self.running.store(false, Ordering::Release);
                return Ok(false);
            }
            WorkerAction::Restart => {
                let args: Vec<String> = RESTART_ARGS.iter().map(|s| s.to_string()).collect();
                ControlWriter::new(std::io::stderr())
                    .request_restart(&args)
                    .context("send restart request")?;
                tracing::info!(target: "Core", "restart requested");
            }
            WorkerAction::ToggleFullscreen => tracing::info!(target: "Render", "fullscreen toggled"),
            WorkerAction::AdjustVolume(v) => tracing::info!(target: "Audio", "volume set to {v}"),
            WorkerAction::SetFsr(on) => tracing::info!(target: "Render", "fsr enabled: {on}"),
            WorkerAction::SetRcas(on) => tracing::info!(target: "Render", "rcas enabled: {on}"),
            WorkerAction::SetRcasAttenuation(v) => {
                tracing::info!(target: "Render", "rcas attenuation set to {v:.3}")
            }
            WorkerAction::ReloadInputs(cfg) => {
                tracing::info!(target: "Input", "reloaded input config {cfg}")
            }
            WorkerAction::SetActivePad {
                index,
                controller_id,
            } => tracing::info!(target: "Input", "pad {index} bound to {controller_id}"),
            WorkerAction::SetActiveController(guid) => {
                tracing::info!(target: "Input", "active controller {guid}")
            }
            WorkerAction::PatchMemory(p) => {
                if p.offset.is_empty() && p.target.is_empty() {
                    tracing::error!(target: "Patch", "patch {} has no address", p.mod_name);
                } else {
                    tracing::info!(target: "Patch", "patch applied: {} at {}", p.mod_name, p.offset);
                }
            }
        }
        Ok(true)
    }

    fn tick(&mut self) {
        if !self.running.load(Ordering::Acquire) || self.paused {
            return;
        }
        self.frames += 1;
        if self.frames % 8 == 0 {
            tracing::warn!(target: "Render", "frame {} took longer than budget", self.frames);
        } else {
            tracing::debug!(target: "Render", "frame {}", self.frames);
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    let env = WorkerEnv::from_env();
    tracing::info!(
        target: "Config",
        "ipc: {}, mods: {}, base game only: {}",
        env.ipc_enabled,
        env.enable_mods,
        env.base_game_only
    );
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        tracing::info!(target: "Config", "arguments: {}", args.join(" "));
    }

    let running = Arc::new(AtomicBool::new(false));
    let mut engine = Engine {
        running: running.clone(),
        paused: false,
        frames: 0,
    };
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);

    if !env.ipc_enabled {
        // Nobody will send RUN.
        engine.begin();
        loop {
            ticker.tick().await;
            engine.tick();
        }
    }

    ControlWriter::new(std::io::stderr())
        .handshake(&Capability::ALL)
        .context("send handshake")?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let reader = shadlink_worker::spawn_control_thread(
        BufReader::new(std::io::stdin()),
        running,
        tx,
    )
    .context("start control thread")?;

    loop {
        tokio::select! {
            action = rx.recv() => match action {
                Some(action) => {
                    if !engine.apply(action)? {
                        return Ok(ExitCode::SUCCESS);
                    }
                }
                None => break,
            },
            _ = ticker.tick() => engine.tick(),
        }
    }

    // The control thread ended: the launcher closed our stdin.
    match reader.join() {
        Ok(Ok(())) => Ok(ExitCode::SUCCESS),
        Ok(Err(err @ ControlError::Truncated { .. })) => {
            tracing::error!(target: "Core", "{err}");
            Ok(ExitCode::from(2))
        }
        Ok(Err(err)) => Err(err.into()),
        Err(_) => anyhow::bail!("control thread panicked"),
    }
}

fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .context("build runtime")?
        .block_on(run())
}
