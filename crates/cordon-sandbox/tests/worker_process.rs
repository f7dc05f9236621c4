//! End-to-end runs against the real `cordon-worker` binary.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use cordon_capabilities::CapabilitySet;
use cordon_sandbox::probe::{self, ProbeStep};
use cordon_sandbox::{
    CompiledUnit, FilesystemPolicy, NetworkPolicy, ResourceLimit, SandboxConfig, SandboxError,
    SandboxManager, SandboxState, WorkerCommand,
};

fn worker() -> WorkerCommand {
    WorkerCommand::new(env!("CARGO_BIN_EXE_cordon-worker"))
}

fn config(caps: &[&str]) -> SandboxConfig {
    SandboxConfig::new(worker(), CapabilitySet::parse(caps).unwrap())
        .with_wall_clock_timeout(Duration::from_secs(20))
}

fn unit(steps: &[ProbeStep]) -> CompiledUnit {
    probe::compile("test", steps).unwrap()
}

fn emit(text: &str) -> ProbeStep {
    ProbeStep::Emit { text: text.into() }
}

fn check(capability: &str) -> ProbeStep {
    ProbeStep::Check {
        capability: capability.into(),
    }
}

#[cfg(unix)]
fn is_reaped(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    kill(Pid::from_raw(i32::try_from(pid).unwrap()), None) == Err(Errno::ESRCH)
}

#[tokio::test]
async fn test_completed_run_returns_output() {
    let manager = SandboxManager::new();
    let output = manager
        .run(
            &unit(&[check("env:read:LANG"), emit("hello from the sandbox")]),
            &config(&["env:read:*"]),
        )
        .await
        .unwrap();

    assert_eq!(output.text(), "hello from the sandbox");
    assert!(!output.truncated);
    assert_eq!(output.usage.checks, 1);
    assert_eq!(output.usage.denied, 0);
    assert_eq!(manager.active_count(), 0);
}

#[tokio::test]
async fn test_denied_capability_fails_inside_child() {
    let err = SandboxManager::new()
        .run(
            &unit(&[check("env:read:HOME"), check("process:spawn:/bin/sh"), emit("never")]),
            &config(&["env:read:*"]),
        )
        .await
        .unwrap_err();

    let SandboxError::ProgramFailed { message } = err else {
        panic!("expected program failure, got {err:?}");
    };
    assert!(message.contains("capability denied: process:spawn:/bin/sh"));
}

#[tokio::test]
async fn test_filesystem_policy_narrows_child_grants() {
    // The parent grants the read, but the deny-all policy strips it.
    let err = SandboxManager::new()
        .run(
            &unit(&[check("file:read:/etc/hostname")]),
            &config(&["file:read:/etc/**"]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::ProgramFailed { .. }));

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap();
    let grant = format!("file:read:{root}/**");
    let output = SandboxManager::new()
        .run(
            &unit(&[check(&format!("file:read:{root}/input.csv")), emit("read ok")]),
            &config(&[grant.as_str()]).with_filesystem_policy(
                FilesystemPolicy::ReadOnly {
                    paths: vec![dir.path().to_path_buf()],
                },
            ),
        )
        .await
        .unwrap();
    assert_eq!(output.text(), "read ok");
}

#[tokio::test]
async fn test_output_is_truncated_not_unbounded() {
    let output = SandboxManager::new()
        .run(
            &unit(&[emit(&"x".repeat(10_000))]),
            &config(&[]).with_max_output_bytes(64),
        )
        .await
        .unwrap();
    assert_eq!(output.output.len(), 64);
    assert!(output.truncated);
}

#[tokio::test]
async fn test_wall_clock_timeout_kills_and_reaps() {
    let manager = SandboxManager::new();
    let run = manager
        .spawn(
            &unit(&[ProbeStep::Sleep { millis: 30_000 }]),
            &config(&[]).with_wall_clock_timeout(Duration::from_millis(500)),
        )
        .unwrap();
    let pid = run.pid();
    let states = run.subscribe();
    assert_eq!(manager.active_pids(), vec![pid]);

    let started = Instant::now();
    let err = run.wait().await.unwrap_err();
    assert!(matches!(err, SandboxError::Timeout { .. }));
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(*states.borrow(), SandboxState::TimedOut);
    assert_eq!(manager.active_count(), 0);
    #[cfg(unix)]
    assert!(is_reaped(pid));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_memory_limit() {
    let limit: u64 = 67_108_864;
    let manager = SandboxManager::new();
    let run = manager
        .spawn(
            &unit(&[ProbeStep::Allocate { bytes: 536_870_912 }, emit("unreachable")]),
            &config(&[]).with_memory_limit(limit),
        )
        .unwrap();
    let pid = run.pid();
    let states = run.subscribe();

    let err = run.wait().await.unwrap_err();
    assert!(
        matches!(
            err,
            SandboxError::ResourceExceeded {
                limit: ResourceLimit::Memory { bytes: 67_108_864 }
            }
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(*states.borrow(), SandboxState::MemoryExceeded);
    assert!(is_reaped(pid));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_cpu_limit() {
    let err = SandboxManager::new()
        .run(
            &unit(&[ProbeStep::Spin { millis: 15_000 }]),
            &config(&[]).with_cpu_time_limit(Duration::from_secs(1)),
        )
        .await
        .unwrap_err();
    assert!(
        matches!(
            err,
            SandboxError::ResourceExceeded {
                limit: ResourceLimit::CpuTime { seconds: 1 }
            }
        ),
        "unexpected error: {err:?}"
    );
}

#[tokio::test]
async fn test_abort_is_a_crash() {
    let err = SandboxManager::new()
        .run(&unit(&[ProbeStep::Abort]), &config(&[]))
        .await
        .unwrap_err();
    let SandboxError::Crashed { reason } = err else {
        panic!("expected crash, got {err:?}");
    };
    assert!(reason.contains("SIGABRT"), "{reason}");
}

#[tokio::test]
async fn test_exit_without_answer_is_a_crash() {
    for code in [0, 3] {
        let err = SandboxManager::new()
            .run(&unit(&[emit("partial"), ProbeStep::Exit { code }]), &config(&[]))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Crashed { .. }), "exit {code}: {err:?}");
    }
}

#[tokio::test]
async fn test_cancellation_terminates_child() {
    let manager = SandboxManager::new();
    let run = manager
        .spawn(&unit(&[ProbeStep::Sleep { millis: 30_000 }]), &config(&[]))
        .unwrap();
    let pid = run.pid();
    let token = run.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        token.cancel();
    });

    let err = run.wait().await.unwrap_err();
    assert!(matches!(err, SandboxError::Cancelled));
    assert_eq!(manager.active_count(), 0);
    #[cfg(unix)]
    assert!(is_reaped(pid));
}

#[tokio::test]
async fn test_concurrent_runs_share_one_unit() {
    let manager = SandboxManager::new();
    let shared = unit(&[check("env:read:USER"), emit("same program")]);
    let config = config(&["env:read:*"]);

    let runs = (0..4).map(|_| {
        let unit = shared.clone();
        let manager = manager.clone();
        let config = config.clone();
        tokio::spawn(async move { manager.run(&unit, &config).await })
    });

    for handle in runs.collect::<Vec<_>>() {
        let output = handle.await.unwrap().unwrap();
        assert_eq!(output.text(), "same program");
    }
    assert!(Arc::ptr_eq(&shared.payload, &shared.clone().payload));
    assert_eq!(manager.active_count(), 0);
}

#[cfg(target_os = "linux")]
fn program_failure(err: SandboxError) -> String {
    match err {
        SandboxError::ProgramFailed { message } => message,
        other => panic!("expected program failure, got {other:?}"),
    }
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_landlock_refuses_reads_outside_policy_roots() {
    let allowed = tempfile::tempdir().unwrap();
    let outside = tempfile::tempdir().unwrap();
    let visible = allowed.path().join("visible.txt");
    let hidden = outside.path().join("hidden.txt");
    std::fs::write(&visible, "visible").unwrap();
    std::fs::write(&hidden, "hidden").unwrap();

    let config = config(&[]).with_filesystem_policy(FilesystemPolicy::ReadOnly {
        paths: vec![allowed.path().to_path_buf()],
    });
    let manager = SandboxManager::new();

    let output = manager
        .run(
            &unit(&[ProbeStep::RawRead {
                path: visible.display().to_string(),
            }]),
            &config,
        )
        .await
        .unwrap();
    assert_eq!(output.text(), "visible");

    // No capability check runs here; only the kernel stands in the way.
    let err = manager
        .run(
            &unit(&[ProbeStep::RawRead {
                path: hidden.display().to_string(),
            }]),
            &config,
        )
        .await
        .unwrap_err();
    assert!(program_failure(err).contains("Permission denied"));
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_landlock_refuses_tcp_under_network_deny() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let connect = unit(&[ProbeStep::RawConnect {
        address: address.clone(),
    }]);
    let manager = SandboxManager::new();

    let allowed = config(&[])
        .with_network_policy(NetworkPolicy::AllowHosts(vec!["127.0.0.1".into()]));
    manager.run(&connect, &allowed).await.unwrap();

    let denied = config(&[]).with_network_policy(NetworkPolicy::Deny);
    let err = manager.run(&connect, &denied).await.unwrap_err();
    let message = program_failure(err);
    assert!(message.contains(&address));
    assert!(message.contains("Permission denied"));
}
