//! Worker supervision: spawning, the control handshake, outbound commands,
//! worker-initiated restarts and graceful-then-forced shutdown.
//!
//! A `Supervisor` is driven from a single task. Output and exit notifications
//! from the worker arrive through [`Supervisor::next_worker_event`] and are fed
//! back one at a time with [`Supervisor::handle_worker_event`]; the only stalls
//! are the bounded write, graceful-stop and restart delays from the config.

use std::time::Duration;

use shadlink_process::{LaunchSpec, SessionId, SessionState, SessionStatus};
use shadlink_proto::{
    Capability, CapabilitySet, Channel, Command, HandshakeEvent, MemoryPatch, Negotiator,
    RestartAccumulator, RestartProgress, encode_frame,
};
use tokio::sync::mpsc;
use tracing::Level;

use crate::{
    config::LauncherConfig,
    console_log::ConsoleLog,
    events::LauncherEvent,
    log_relay::{self, LogColor, LogEntry, Relayed},
    spawner::{Spawner, WorkerEvent, WorkerHandle},
};


struct Attached<H> {
    id: SessionId,
    generation: u64,
    ipc_enabled: bool,
    handle: H,
    negotiator: Negotiator,
    restart: RestartAccumulator,
}

pub struct Supervisor<S: Spawner> {
    config: LauncherConfig,
    spawner: S,
    log: ConsoleLog,
    events: mpsc::UnboundedSender<LauncherEvent>,
    worker_tx: mpsc::UnboundedSender<WorkerEvent>,
    worker_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    state: SessionState,
    attached: Option<Attached<S::Handle>>,
    last_launch: Option<LaunchSpec>,
    pending_restart: bool,
    restart_args: Vec<String>,
    generation: u64,
    last_exit_code: Option<i32>,
}

/// Writes every frame of one command. A frame that does not flush within
/// `timeout` is given up on silently; a broken pipe ends the command.
async fn write_frames<H: WorkerHandle>(handle: &mut H, frames: &[String], timeout: Duration) {
    for frame in frames {
        match tokio::time::timeout(timeout, handle.write_frame(&encode_frame(frame))).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(%err, frame = %frame, "worker stdin write failed");
                return;
            }
            Err(_) => tracing::trace!(frame = %frame, "worker stdin flush timed out"),
        }
    }
}

impl<S: Spawner> Supervisor<S> {
    pub fn new(
        config: LauncherConfig,
        spawner: S,
        log: ConsoleLog,
    ) -> (Self, mpsc::UnboundedReceiver<LauncherEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (worker_tx, worker_rx) = mpsc::unbounded_channel();
        let sup = Self {
            config,
            spawner,
            log,
            events,
            worker_tx,
            worker_rx,
            state: SessionState::Idle,
            attached: None,
            last_launch: None,
            pending_restart: false,
            restart_args: Vec::new(),
            generation: 0,
            last_exit_code: None,
        };
        (sup, events_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    pub fn current_generation(&self) -> Option<u64> {
        self.attached.as_ref().map(|a| a.generation)
    }

    /// Capabilities of the attached worker, once its handshake has completed.
    pub fn capabilities(&self) -> Option<&CapabilitySet> {
        self.attached
            .as_ref()
            .and_then(|a| a.negotiator.capabilities())
    }

    pub fn log(&self) -> &ConsoleLog {
        &self.log
    }

    pub fn status(&self) -> SessionStatus {
        let att = self.attached.as_ref();
        SessionStatus {
            id: att.map(|a| a.id.clone()),
            state: self.state,
            pid: att.and_then(|a| a.handle.pid()),
            launch: self.last_launch.clone(),
            ipc_ready: att.is_some_and(|a| a.negotiator.is_complete()),
            capabilities: self
                .capabilities()
                .map(|c| c.iter().map(|(k, v)| (k.to_string(), v)).collect()),
            pending_restart: self.pending_restart,
            last_exit_code: self.last_exit_code,
        }
    }

    fn publish(&self, event: LauncherEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Spawns a worker for `spec`. Any attached worker is discarded first,
    /// without a graceful stop.
    pub async fn start(&mut self, spec: LaunchSpec) -> anyhow::Result<()> {
        if let Some(old) = self.attached.take() {
            tracing::info!(session = %old.id, "replacing attached worker");
            drop(old);
        }
        self.pending_restart = false;
        self.restart_args.clear();

        self.generation = self.generation.saturating_add(1);
        let generation = self.generation;
        let env = self.config.spawn_env(spec.ipc_enabled);
        self.state = SessionState::Starting;

        let handle = match self
            .spawner
            .spawn(&spec, &env, generation, self.worker_tx.clone())
            .await
        {
            Ok(h) => h,
            Err(err) => {
                self.state = SessionState::Idle;
                self.log
                    .note(Level::ERROR, format!("failed to start worker: {err:#}"))
                    .await;
                return Err(err);
            }
        };

        let id = SessionId::new();
        self.log
            .note(
                Level::INFO,
                format!(
                    "worker started: {} {} (pid {}, ipc {})",
                    spec.program.display(),
                    spec.args.join(" "),
                    handle
                        .pid()
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "?".to_string()),
                    if spec.ipc_enabled { "on" } else { "off" },
                ),
            )
            .await;

        if !spec.ipc_enabled {
            // No handshake to wait for.
            self.state = SessionState::Running;
        }
        self.attached = Some(Attached {
            id,
            generation,
            ipc_enabled: spec.ipc_enabled,
            handle,
            negotiator: Negotiator::new(),
            restart: RestartAccumulator::new(),
        });
        self.last_launch = Some(spec);
        Ok(())
    }

    /// Asks the worker to stop, then kills it if it is still alive after the
    /// grace period. The handle is released either way.
    pub async fn stop(&mut self) {
        let Some(mut att) = self.attached.take() else {
            tracing::debug!("stop: no worker attached");
            return;
        };
        self.state = SessionState::Stopping;
        self.pending_restart = false;
        self.restart_args.clear();

        if att.negotiator.is_complete() {
            write_frames(
                &mut att.handle,
                &Command::Stop.to_frames(),
                self.config.write_timeout(),
            )
            .await;
        }

        let grace = self.config.stop_grace();
        if !att.handle.wait_exit(grace).await {
            self.log
                .note(
                    Level::WARN,
                    format!(
                        "worker did not exit within {}ms; terminating",
                        grace.as_millis()
                    ),
                )
                .await;
            if let Err(err) = att.handle.kill().await {
                self.log
                    .note(Level::WARN, format!("failed to kill worker: {err}"))
                    .await;
            }
        }

        // The exit event still on its way belongs to a detached generation
        // and is dropped, so the status is taken from the handle here.
        let exit_code = att.handle.exit_code();
        let session = att.id.clone();
        drop(att);
        self.last_exit_code = exit_code;
        self.state = SessionState::Idle;
        self.publish(LauncherEvent::ProcessClosed { session, exit_code });
    }

    /// Stops the attached worker and launches it again with the recorded
    /// path, arguments and working directory.
    pub async fn restart(&mut self) -> anyhow::Result<()> {
        let spec = match (&self.attached, &self.last_launch) {
            (Some(_), Some(spec)) => spec.clone(),
            _ => {
                self.log
                    .note(
                        Level::ERROR,
                        "restart requested but no worker is running",
                    )
                    .await;
                return Ok(());
            }
        };

        self.pending_restart = false;
        self.stop().await;
        tokio::time::sleep(self.config.restart_delay()).await;
        self.start(spec).await
    }

    pub async fn next_worker_event(&mut self) -> Option<WorkerEvent> {
        self.worker_rx.recv().await
    }

    pub async fn handle_worker_event(&mut self, ev: WorkerEvent) {
        if self.current_generation() != Some(ev.generation()) {
            tracing::trace!(
                generation = ev.generation(),
                "dropping event from a detached worker"
            );
            return;
        }

        match ev {
            WorkerEvent::Line { line, .. } => match log_relay::relay(&line) {
                Relayed::Log(entry) => self.log.emit(entry).await,
                Relayed::Control(payload) => {
                    let ipc = self.attached.as_ref().is_some_and(|a| a.ipc_enabled);
                    if ipc {
                        self.handle_control(payload).await;
                    } else {
                        self.log
                            .emit(LogEntry {
                                channel: Channel::Stderr,
                                color: LogColor::Red,
                                text: line.text,
                            })
                            .await;
                    }
                }
                Relayed::Dropped => {}
            },
            WorkerEvent::Exited { code, .. } => self.on_process_exit(code).await,
        }
    }

    async fn handle_control(&mut self, payload: String) {
        let progress = match self.attached.as_mut() {
            Some(att) => att.restart.feed(&payload),
            None => return,
        };
        match progress {
            Ok(RestartProgress::NotRestart) => {}
            Ok(RestartProgress::Pending) => return,
            Ok(RestartProgress::Complete(args)) => {
                self.on_restart_request(args).await;
                return;
            }
            Err(err) => {
                self.log
                    .note(Level::ERROR, format!("malformed restart request: {err}"))
                    .await;
                return;
            }
        }

        let event = match self.attached.as_mut() {
            Some(att) => att.negotiator.observe(&payload),
            None => return,
        };
        match event {
            HandshakeEvent::Started => tracing::debug!("worker control channel is live"),
            HandshakeEvent::Announced(key) => {
                tracing::debug!(capability = %key, "worker announced capability")
            }
            HandshakeEvent::Completed { missing } => self.on_handshake_complete(missing).await,
            HandshakeEvent::Ignored => tracing::debug!(frame = %payload, "ignoring control frame"),
        }
    }

    async fn on_handshake_complete(&mut self, missing: Vec<Capability>) {
        let Some(att) = self.attached.as_ref() else {
            return;
        };
        let session = att.id.clone();
        let capabilities = att.negotiator.capabilities().cloned().unwrap_or_default();

        for capability in missing {
            self.log
                .note(
                    Level::WARN,
                    format!(
                        "{}: feature not supported by this worker version",
                        capability.key()
                    ),
                )
                .await;
            self.publish(LauncherEvent::CapabilityMissing {
                session: session.clone(),
                capability,
            });
        }

        if self.state == SessionState::Starting {
            self.state = SessionState::Running;
        }
        self.send(Command::Run).await;
        self.publish(LauncherEvent::WorkerReady {
            session,
            capabilities,
        });
    }

    async fn on_restart_request(&mut self, args: Vec<String>) {
        let timeout = self.config.write_timeout();
        let Some(att) = self.attached.as_mut() else {
            return;
        };
        self.log
            .note(
                Level::INFO,
                format!("worker requested a restart ({} argument(s))", args.len()),
            )
            .await;
        self.pending_restart = true;
        self.restart_args = args;
        self.state = SessionState::RestartPending;
        write_frames(&mut att.handle, &Command::Stop.to_frames(), timeout).await;
    }

    async fn on_process_exit(&mut self, code: Option<i32>) {
        let Some(att) = self.attached.take() else {
            return;
        };
        let session = att.id.clone();
        drop(att);

        self.last_exit_code = code;
        self.log
            .note(
                Level::INFO,
                format!(
                    "worker exited (code {})",
                    code.map(|c| c.to_string())
                        .unwrap_or_else(|| "none".to_string())
                ),
            )
            .await;
        self.publish(LauncherEvent::ProcessClosed {
            session: session.clone(),
            exit_code: code,
        });

        if !self.pending_restart {
            self.state = SessionState::Idle;
            return;
        }
        self.pending_restart = false;
        let args = std::mem::take(&mut self.restart_args);
        self.publish(LauncherEvent::RestartRequested {
            session,
            args: args.clone(),
        });

        let Some(mut spec) = self.last_launch.clone() else {
            self.state = SessionState::Idle;
            return;
        };
        spec.args = args;
        if let Err(err) = self.start(spec).await {
            tracing::warn!(error = %err, "worker relaunch failed");
        }
    }

    /// Sends a command to the attached worker. Without a worker, or before the
    /// worker finished its handshake, the command is dropped.
    pub async fn send(&mut self, cmd: Command) {
        let timeout = self.config.write_timeout();
        let Some(att) = self.attached.as_mut() else {
            tracing::debug!(command = %cmd, "no worker attached; command dropped");
            return;
        };
        if !att.negotiator.is_complete() {
            tracing::debug!(command = %cmd, "worker control channel not established; command dropped");
            return;
        }
        write_frames(&mut att.handle, &cmd.to_frames(), timeout).await;
    }

    pub async fn send_start(&mut self) {
        self.send(Command::Start).await
    }

    pub async fn pause(&mut self) {
        self.send(Command::Pause).await
    }

    pub async fn resume(&mut self) {
        self.send(Command::Resume).await
    }

    /// Asks the worker to stop without waiting or escalating.
    pub async fn soft_stop(&mut self) {
        self.send(Command::Stop).await
    }

    pub async fn toggle_fullscreen(&mut self) {
        self.send(Command::ToggleFullscreen).await
    }

    pub async fn adjust_volume(&mut self, volume: i32) {
        self.send(Command::AdjustVolume(volume)).await
    }

    pub async fn set_fsr(&mut self, enabled: bool) {
        self.send(Command::SetFsr(enabled)).await
    }

    pub async fn set_rcas(&mut self, enabled: bool) {
        self.send(Command::SetRcas(enabled)).await
    }

    pub async fn set_rcas_attenuation(&mut self, attenuation: i32) {
        self.send(Command::SetRcasAttenuation(attenuation)).await
    }

    pub async fn reload_inputs(&mut self, config: impl Into<String>) {
        self.send(Command::ReloadInputs(config.into())).await
    }

    pub async fn set_active_controller(&mut self, guid: impl Into<String>) {
        self.send(Command::SetActiveController(guid.into())).await
    }

    pub async fn set_active_pad(&mut self, index: i32, controller_id: impl Into<String>) {
        self.send(Command::SetActivePad {
            index,
            controller_id: controller_id.into(),
        })
        .await
    }

    pub async fn apply_memory_patch(&mut self, patch: MemoryPatch) {
        self.send(Command::PatchMemory(patch)).await
    }
}
