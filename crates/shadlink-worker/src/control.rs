//! Decoding of launcher commands arriving on the worker's stdin.

use std::{
    io::{self, BufRead},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::JoinHandle,
};

use shadlink_proto::{Command, MemoryPatch};
use tokio::sync::mpsc;

/// What the engine is asked to do. PAUSE and RESUME both arrive as
/// [`WorkerAction::TogglePause`].
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerAction {
    Start,
    Run,
    TogglePause,
    Stop,
    Restart,
    ToggleFullscreen,
    AdjustVolume(i32),
    SetFsr(bool),
    SetRcas(bool),
    /// Already scaled from the wire's thousandths.
    SetRcasAttenuation(f32),
    ReloadInputs(String),
    SetActivePad { index: i32, controller_id: String },
    SetActiveController(String),
    PatchMemory(MemoryPatch),
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("{command}: stream ended after {got} of {expected} parameters")]
    Truncated {
        command: String,
        expected: usize,
        got: usize,
    },
    #[error("control read failed: {0}")]
    Io(#[from] io::Error),
}

/// Maps a decoded command to an engine action. `STOP` and `RESTART` are
/// dropped unless a game is running.
pub fn map_command(cmd: Command, running: bool) -> Option<WorkerAction> {
    let action = match cmd {
        Command::Start => WorkerAction::Start,
        Command::Run => WorkerAction::Run,
        Command::Pause | Command::Resume => WorkerAction::TogglePause,
        Command::Stop if running => WorkerAction::Stop,
        Command::Restart if running => WorkerAction::Restart,
        Command::Stop | Command::Restart => return None,
        Command::ToggleFullscreen => WorkerAction::ToggleFullscreen,
        Command::AdjustVolume(v) => WorkerAction::AdjustVolume(v),
        Command::SetFsr(on) => WorkerAction::SetFsr(on),
        Command::SetRcas(on) => WorkerAction::SetRcas(on),
        Command::SetRcasAttenuation(v) => WorkerAction::SetRcasAttenuation(v as f32 / 1000.0),
        Command::ReloadInputs(cfg) => WorkerAction::ReloadInputs(cfg),
        Command::SetActivePad {
            index,
            controller_id,
        } => WorkerAction::SetActivePad {
            index,
            controller_id,
        },
        Command::SetActiveController(guid) => WorkerAction::SetActiveController(guid),
        Command::PatchMemory(patch) => WorkerAction::PatchMemory(patch),
    };
    Some(action)
}

/// Blocking command loop over a line reader.
pub struct ControlReader<R> {
    reader: R,
    running: Arc<AtomicBool>,
    actions: mpsc::UnboundedSender<WorkerAction>,
}

impl<R: BufRead> ControlReader<R> {
    pub fn new(
        reader: R,
        running: Arc<AtomicBool>,
        actions: mpsc::UnboundedSender<WorkerAction>,
    ) -> Self {
        Self {
            reader,
            running,
            actions,
        }
    }

    fn read_line(&mut self) -> io::Result<Option<String>> {
        let mut buf = Vec::new();
        if self.reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
        }
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Runs until the launcher closes the stream or the engine goes away.
    pub fn run(mut self) -> Result<(), ControlError> {
        while let Some(name) = self.read_line()? {
            let Some(arity) = Command::arity(&name) else {
                tracing::debug!(command = %name, "ignoring unknown command");
                continue;
            };

            let mut params = Vec::with_capacity(arity);
            while params.len() < arity {
                match self.read_line()? {
                    Some(p) => params.push(p),
                    None => {
                        return Err(ControlError::Truncated {
                            command: name,
                            expected: arity,
                            got: params.len(),
                        });
                    }
                }
            }

            let cmd = match Command::decode(&name, &params) {
                Ok(cmd) => cmd,
                Err(err) => {
                    tracing::warn!(%err, "rejected launcher command");
                    continue;
                }
            };
            let Some(action) = map_command(cmd, self.running.load(Ordering::Acquire)) else {
                tracing::debug!(command = %name, "no game running; command ignored");
                continue;
            };
            if self.actions.send(action).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Starts the control loop on its own thread.
pub fn spawn_control_thread<R>(
    reader: R,
    running: Arc<AtomicBool>,
    actions: mpsc::UnboundedSender<WorkerAction>,
) -> io::Result<JoinHandle<Result<(), ControlError>>>
where
    R: BufRead + Send + 'static,
{
    std::thread::Builder::new()
        .name("shadlink-control".to_string())
        .spawn(move || ControlReader::new(reader, running, actions).run())
}
