use std::{process::Stdio, time::Duration};

use anyhow::Context;
use shadlink_process::LaunchSpec;
use shadlink_proto::{Channel, Line, LineFramer};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::{ChildStdin, Command},
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};

// Output still buffered in the pipes when the worker exits gets this long to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);
const READ_CHUNK: usize = 4096;

/// Everything the launcher hears from a worker process, tagged with the spawn
/// generation so that events from a replaced process can be told apart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Line { generation: u64, line: Line },
    Exited { generation: u64, code: Option<i32> },
}

impl WorkerEvent {
    pub fn generation(&self) -> u64 {
        match self {
            WorkerEvent::Line { generation, .. } | WorkerEvent::Exited { generation, .. } => {
                *generation
            }
        }
    }
}

/// A spawned worker. Dropping the handle kills the process.
#[allow(async_fn_in_trait)]
pub trait WorkerHandle {
    fn pid(&self) -> Option<u32>;

    /// Writes one encoded frame to the worker's stdin and flushes it.
    async fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()>;

    /// Waits up to `timeout` for the process to exit. Returns whether it did.
    async fn wait_exit(&mut self, timeout: Duration) -> bool;

    /// Exit status once the process is known to have exited, `None` while it
    /// is running or when it died from a signal.
    fn exit_code(&self) -> Option<i32>;

    async fn kill(&mut self) -> std::io::Result<()>;
}

#[allow(async_fn_in_trait)]
pub trait Spawner {
    type Handle: WorkerHandle;

    /// Spawns the worker. Output lines and the exit notification must be
    /// delivered on `events`, in order per stream, tagged with `generation`.
    async fn spawn(
        &mut self,
        spec: &LaunchSpec,
        env: &[(&'static str, Option<String>)],
        generation: u64,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> anyhow::Result<Self::Handle>;
}

#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    // Take the worker down with the launcher if the launcher dies.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

/// Spawns real worker processes through `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct ProcessSpawner;

pub struct ChildWorker {
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    kill_tx: Option<oneshot::Sender<()>>,
    exited: watch::Receiver<Option<Option<i32>>>,
}

impl WorkerHandle for ChildWorker {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    async fn write_frame(&mut self, frame: &[u8]) -> std::io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::BrokenPipe))?;
        stdin.write_all(frame).await?;
        stdin.flush().await
    }

    async fn wait_exit(&mut self, timeout: Duration) -> bool {
        let mut rx = self.exited.clone();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|v| v.is_some())).await,
            Ok(Ok(_))
        )
    }

    fn exit_code(&self) -> Option<i32> {
        self.exited.borrow().flatten()
    }

    async fn kill(&mut self) -> std::io::Result<()> {
        // Closing stdin first lets a worker blocked on its control reader see EOF.
        self.stdin = None;
        match self.kill_tx.take() {
            Some(tx) => {
                let _ = tx.send(());
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Spawner for ProcessSpawner {
    type Handle = ChildWorker;

    async fn spawn(
        &mut self,
        spec: &LaunchSpec,
        env: &[(&'static str, Option<String>)],
        generation: u64,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> anyhow::Result<ChildWorker> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.workdir {
            cmd.current_dir(dir);
        }
        for (key, value) in env {
            match value {
                Some(v) => cmd.env(key, v),
                None => cmd.env_remove(key),
            };
        }

        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    // Own session, so a forced kill reaches the whole process tree.
                    set_parent_death_signal()?;
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "spawn worker: {} (cwd {})",
                spec.program.display(),
                spec.workdir
                    .as_ref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_else(|| ".".to_string())
            )
        })?;
        let pid = child.id();

        let stdin = child.stdin.take();
        let mut pumps: Vec<JoinHandle<()>> = Vec::new();
        if let Some(out) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(out, Channel::Stdout, generation, events.clone())));
        }
        if let Some(err) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(err, Channel::Stderr, generation, events.clone())));
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            let status = tokio::select! {
                res = child.wait() => res,
                // Fires on an explicit kill and when the handle is dropped.
                _ = kill_rx => {
                    #[cfg(unix)]
                    if let Some(pid) = pid {
                        unsafe {
                            libc::kill(-(pid as i32), libc::SIGKILL);
                        }
                    }
                    let _ = child.start_kill();
                    child.wait().await
                }
            };
            let code = status.ok().and_then(|s| s.code());
            let _ = exit_tx.send(Some(code));

            for p in pumps {
                let _ = tokio::time::timeout(DRAIN_TIMEOUT, p).await;
            }
            let _ = events.send(WorkerEvent::Exited { generation, code });
        });

        Ok(ChildWorker {
            pid,
            stdin,
            kill_tx: Some(kill_tx),
            exited: exit_rx,
        })
    }
}

async fn pump<R: AsyncRead + Unpin>(
    mut reader: R,
    channel: Channel,
    generation: u64,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut framer = LineFramer::new(channel);
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) => {
                tracing::debug!(?channel, %err, "worker pipe read failed");
                break;
            }
        };
        for line in framer.push(&buf[..n]) {
            if events.send(WorkerEvent::Line { generation, line }).is_err() {
                return;
            }
        }
    }
    if let Some(line) = framer.finish() {
        let _ = events.send(WorkerEvent::Line { generation, line });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pump_frames_and_flushes_tail() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let input: &[u8] = b"one\r\ntwo\nthree";
        pump(input, Channel::Stderr, 7, tx).await;

        let mut got = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            assert_eq!(ev.generation(), 7);
            if let WorkerEvent::Line { line, .. } = ev {
                assert_eq!(line.channel, Channel::Stderr);
                got.push(line.text);
            }
        }
        assert_eq!(got, vec!["one", "two", "three"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn spawned_process_reports_lines_then_exit() {
        let spec = LaunchSpec {
            program: "/bin/sh".into(),
            args: vec![
                "-c".to_string(),
                "echo out; echo \";$SHADPS4_ENABLE_IPC\" >&2; exit 3".to_string(),
            ],
            workdir: None,
            ipc_enabled: true,
        };
        let env = [("SHADPS4_ENABLE_IPC", Some("true".to_string()))];
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = ProcessSpawner.spawn(&spec, &env, 1, tx).await.unwrap();
        assert!(handle.pid().is_some());

        let mut lines = Vec::new();
        let code = loop {
            match rx.recv().await.unwrap() {
                WorkerEvent::Line { line, .. } => lines.push((line.channel, line.text)),
                WorkerEvent::Exited { code, .. } => break code,
            }
        };
        assert_eq!(code, Some(3));
        assert!(lines.contains(&(Channel::Stdout, "out".to_string())));
        assert!(lines.contains(&(Channel::Stderr, ";true".to_string())));
        assert!(handle.wait_exit(Duration::from_millis(10)).await);
        assert_eq!(handle.exit_code(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_terminates_a_stuck_process() {
        let spec = LaunchSpec {
            program: "/bin/sh".into(),
            args: vec!["-c".to_string(), "sleep 30".to_string()],
            workdir: None,
            ipc_enabled: false,
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut handle = ProcessSpawner.spawn(&spec, &[], 2, tx).await.unwrap();
        assert!(!handle.wait_exit(Duration::from_millis(50)).await);

        handle.kill().await.unwrap();
        assert!(handle.wait_exit(Duration::from_secs(5)).await);
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, WorkerEvent::Exited { generation: 2, code: None }));
    }
}
