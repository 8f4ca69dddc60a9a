//! Drives the real stub worker binary through the launcher's process spawner.

use std::{path::PathBuf, time::Duration};

use shadlink_launcher::{
    ConsoleLog, LauncherConfig, LauncherEvent, ProcessSpawner, Supervisor,
    console_log::Origin,
};
use shadlink_process::{LaunchSpec, SessionState};
use shadlink_proto::{Capability, Command, MemoryPatch, PatchMask};
use tokio::{sync::mpsc, time::Instant};
use tracing::Level;

const TIMEOUT: Duration = Duration::from_secs(15);

fn launcher(grace_ms: u64) -> (Supervisor<ProcessSpawner>, mpsc::UnboundedReceiver<LauncherEvent>) {
    let mut cfg = LauncherConfig::default();
    cfg.timeouts.graceful_stop_ms = grace_ms;
    cfg.timeouts.restart_delay_ms = 0;
    Supervisor::new(cfg, ProcessSpawner, ConsoleLog::new(1000))
}

fn stub(ipc_enabled: bool) -> LaunchSpec {
    LaunchSpec {
        program: PathBuf::from(env!("CARGO_BIN_EXE_shadlink-stub-worker")),
        args: Vec::new(),
        workdir: None,
        ipc_enabled,
    }
}

async fn step(sup: &mut Supervisor<ProcessSpawner>, deadline: Instant) {
    let ev = tokio::time::timeout_at(deadline, sup.next_worker_event())
        .await
        .expect("timed out waiting for the worker")
        .expect("worker event channel closed");
    sup.handle_worker_event(ev).await;
}

async fn has_log(sup: &Supervisor<ProcessSpawner>, needle: &str) -> bool {
    let (recs, _) = sup.log().tail_after(0, 1000).await;
    recs.iter()
        .any(|r| matches!(r.origin, Origin::Worker(_)) && r.text.contains(needle))
}

async fn wait_for_log(sup: &mut Supervisor<ProcessSpawner>, needle: &str) {
    let deadline = Instant::now() + TIMEOUT;
    while !has_log(sup, needle).await {
        step(sup, deadline).await;
    }
}

async fn wait_for_handshake(sup: &mut Supervisor<ProcessSpawner>) {
    let deadline = Instant::now() + TIMEOUT;
    while sup.capabilities().is_none() {
        step(sup, deadline).await;
    }
}

async fn launcher_warnings(sup: &Supervisor<ProcessSpawner>) -> usize {
    let (recs, _) = sup.log().tail_after(0, 1000).await;
    recs.iter()
        .filter(|r| r.origin == Origin::Launcher && r.level == Level::WARN)
        .count()
}

#[tokio::test]
async fn handshake_commands_and_graceful_stop() {
    let (mut sup, mut events) = launcher(5000);
    sup.start(stub(true)).await.unwrap();

    wait_for_handshake(&mut sup).await;
    let caps = sup.capabilities().unwrap();
    assert!(caps.supports(Capability::MemoryPatch));
    assert!(caps.supports(Capability::EmuControl));
    assert_eq!(sup.state(), SessionState::Running);
    assert!(matches!(
        events.try_recv(),
        Ok(LauncherEvent::WorkerReady { .. })
    ));

    wait_for_log(&mut sup, "[Core] <Info> game started").await;

    sup.apply_memory_patch(MemoryPatch {
        mod_name: "60fps".to_string(),
        offset: "0x1000".to_string(),
        value: "0x3C".to_string(),
        target: String::new(),
        size: "4".to_string(),
        is_offset: true,
        little_endian: true,
        mask: PatchMask::None,
        mask_offset: 0,
    })
    .await;
    wait_for_log(&mut sup, "patch applied: 60fps at 0x1000").await;

    sup.set_rcas_attenuation(250).await;
    wait_for_log(&mut sup, "rcas attenuation set to 0.250").await;

    sup.set_active_pad(1, "pad-b").await;
    wait_for_log(&mut sup, "pad 1 bound to pad-b").await;

    sup.stop().await;
    assert_eq!(sup.state(), SessionState::Idle);
    assert!(!sup.is_attached());
    assert_eq!(launcher_warnings(&sup).await, 0);
    assert_eq!(sup.status().last_exit_code, Some(0));
}

#[tokio::test]
async fn worker_requested_restart_relaunches_with_its_arguments() {
    let (mut sup, mut events) = launcher(5000);
    sup.start(stub(true)).await.unwrap();
    wait_for_handshake(&mut sup).await;
    wait_for_log(&mut sup, "game started").await;
    let first = sup.current_generation().unwrap();

    sup.send(Command::Restart).await;

    let deadline = Instant::now() + TIMEOUT;
    let mut seen = Vec::new();
    while !seen
        .iter()
        .any(|e| matches!(e, LauncherEvent::RestartRequested { .. }))
    {
        step(&mut sup, deadline).await;
        while let Ok(ev) = events.try_recv() {
            seen.push(ev);
        }
    }

    let closed = seen
        .iter()
        .position(|e| matches!(e, LauncherEvent::ProcessClosed { exit_code: Some(0), .. }))
        .expect("worker exited cleanly first");
    let requested = seen
        .iter()
        .position(|e| matches!(e, LauncherEvent::RestartRequested { args, .. } if args == &["--restarted"]))
        .expect("restart with the worker's arguments");
    assert!(closed < requested);

    assert_eq!(sup.current_generation(), Some(first + 1));
    assert_eq!(sup.status().launch.unwrap().args, vec!["--restarted"]);

    wait_for_handshake(&mut sup).await;
    wait_for_log(&mut sup, "arguments: --restarted").await;

    sup.stop().await;
    assert_eq!(launcher_warnings(&sup).await, 0);
}

#[tokio::test]
async fn worker_without_ipc_is_killed_on_stop() {
    let (mut sup, _events) = launcher(200);
    sup.start(stub(false)).await.unwrap();
    assert_eq!(sup.state(), SessionState::Running);

    wait_for_log(&mut sup, "game started").await;
    wait_for_log(&mut sup, "ipc: false").await;
    assert!(sup.capabilities().is_none());

    sup.stop().await;
    assert!(!sup.is_attached());
    assert_eq!(launcher_warnings(&sup).await, 1);
}
