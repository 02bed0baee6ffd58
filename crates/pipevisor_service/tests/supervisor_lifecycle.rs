//! End-to-end supervisor tests against real child processes.
//!
//! These rely on `sh`, `cat` and `sleep`, so they only run on unix.

#![cfg(unix)]

use pipevisor_service::{
    CommandSpec, ReadinessPolicy, ServiceSupervisor, SupervisorConfig, SupervisorError,
    SynchronizedSink,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

fn supervisor_on_port(port: u16) -> ServiceSupervisor {
    ServiceSupervisor::new(SupervisorConfig {
        name: "test-engine".to_string(),
        api_port: port,
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    })
    .unwrap()
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Wait until the captured output contains `needle`.
async fn wait_for_output(sink: &SynchronizedSink<Vec<u8>>, needle: &str) -> String {
    for _ in 0..100 {
        let out = String::from_utf8_lossy(&sink.snapshot().unwrap()).into_owned();
        if out.contains(needle) {
            return out;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("output never contained {needle:?}");
}

/// Minimal HTTP server answering every request with `status` and `body`.
async fn serve_http(status: &'static str, body: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    port
}

#[tokio::test]
async fn stdin_round_trip_then_teardown() {
    let mut sup = supervisor_on_port(free_port().await);
    let sink = Arc::new(SynchronizedSink::capture());

    let handle = sup.spawn(CommandSpec::new("cat"), Arc::clone(&sink)).unwrap();
    assert!(handle.alive);
    assert!(handle.pid > 0);
    assert!(sup.is_alive().unwrap());

    sup.write_to_stdin("hello engine").await.unwrap();
    wait_for_output(&sink, "hello engine\n").await;

    sup.teardown().await.unwrap();
    assert!(sup.handle().is_none());
    assert!(matches!(sup.is_alive(), Err(SupervisorError::NotRunning(_))));

    // Idempotent.
    sup.teardown().await.unwrap();
}

#[tokio::test]
async fn exited_process_is_reported_not_quietly_false() {
    let mut sup = supervisor_on_port(free_port().await);
    let sink = Arc::new(SynchronizedSink::capture());

    sup.spawn(
        CommandSpec::new("sh").args(["-c", "exit 4"]),
        Arc::clone(&sink),
    )
    .unwrap();
    assert_eq!(sup.wait_for_exit().await.unwrap(), Some(4));

    match sup.is_alive() {
        Err(SupervisorError::Exited { exit_code, .. }) => assert_eq!(exit_code, Some(4)),
        other => panic!("expected Exited, got {other:?}"),
    }
    assert_eq!(sup.exit_code(), Some(4));
    assert!(sup.write_to_stdin("late").await.is_err());
}

#[tokio::test]
async fn exit_is_reported_while_a_grandchild_holds_the_pipes() {
    let mut sup = supervisor_on_port(free_port().await);
    let sink = Arc::new(SynchronizedSink::capture());

    sup.spawn(
        CommandSpec::new("sh").args(["-c", "echo parent; sleep 6 & exit 3"]),
        Arc::clone(&sink),
    )
    .unwrap();

    let started = std::time::Instant::now();
    let code = tokio::time::timeout(Duration::from_secs(5), sup.wait_for_exit())
        .await
        .expect("wait_for_exit blocked on the grandchild")
        .unwrap();
    assert_eq!(code, Some(3));
    assert!(started.elapsed() < Duration::from_secs(4));
    assert!(String::from_utf8_lossy(&sink.snapshot().unwrap()).contains("parent"));
    sup.teardown().await.unwrap();
}

#[tokio::test]
async fn stdout_and_stderr_share_one_sink() {
    let mut sup = supervisor_on_port(free_port().await);
    let sink = Arc::new(SynchronizedSink::capture());

    let script = "for i in 1 2 3; do echo out$i; echo err$i 1>&2; done";
    sup.spawn(CommandSpec::new("sh").args(["-c", script]), Arc::clone(&sink))
        .unwrap();
    assert_eq!(sup.wait_for_exit().await.unwrap(), Some(0));

    let out = String::from_utf8(sink.snapshot().unwrap()).unwrap();
    let mut lines: Vec<&str> = out.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, vec!["err1", "err2", "err3", "out1", "out2", "out3"]);
}

#[tokio::test]
async fn explicit_env_override_reaches_child() {
    let mut sup = supervisor_on_port(free_port().await);
    let sink = Arc::new(SynchronizedSink::capture());

    let spec = CommandSpec::new("sh")
        .args(["-c", "echo \"java=$ENGINE_JAVA_HOME\""])
        .env("ENGINE_JAVA_HOME", "/opt/runtime jdk");
    sup.spawn(spec, Arc::clone(&sink)).unwrap();
    sup.wait_for_exit().await.unwrap();

    let out = String::from_utf8(sink.snapshot().unwrap()).unwrap();
    assert_eq!(out.trim(), "java=/opt/runtime jdk");
}

#[tokio::test]
async fn teardown_terminates_a_process_that_ignores_stdin() {
    let mut sup = supervisor_on_port(free_port().await);
    sup.spawn(
        CommandSpec::new("sleep").arg("30"),
        Arc::new(SynchronizedSink::capture()),
    )
    .unwrap();

    let started = std::time::Instant::now();
    sup.teardown().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert!(sup.handle().is_none());
}

#[tokio::test]
async fn spawning_twice_while_running_is_rejected() {
    let mut sup = supervisor_on_port(free_port().await);
    let sink = Arc::new(SynchronizedSink::capture());
    sup.spawn(CommandSpec::new("sleep").arg("30"), Arc::clone(&sink))
        .unwrap();

    let err = sup
        .spawn(CommandSpec::new("sleep").arg("30"), Arc::clone(&sink))
        .unwrap_err();
    assert!(matches!(err, SupervisorError::AlreadyRunning(_)));

    sup.teardown().await.unwrap();
}

#[tokio::test]
async fn port_open_succeeds_when_listening() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let sup = supervisor_on_port(listener.local_addr().unwrap().port());

    let attempt = sup
        .wait_until_port_open(ReadinessPolicy::new(3, Duration::from_millis(10)))
        .await
        .unwrap();
    assert_eq!(attempt, 1);
}

#[tokio::test]
async fn port_never_opening_is_a_readiness_timeout() {
    let sup = supervisor_on_port(free_port().await);

    let err = sup
        .wait_until_port_open(ReadinessPolicy::new(3, Duration::from_millis(10)))
        .await
        .unwrap_err();
    match err {
        SupervisorError::Readiness(timeout) => {
            assert_eq!(timeout.attempts, 3);
            assert!(timeout.to_string().contains("3 attempts"));
        }
        other => panic!("expected readiness timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn api_responsive_when_node_info_answers() {
    let port = serve_http("200 OK", r#"{"host":"box","version":"8.15.0","id":"abc"}"#).await;
    let sup = supervisor_on_port(port);

    let attempt = sup
        .wait_until_api_responsive(ReadinessPolicy::new(5, Duration::from_millis(20)))
        .await
        .unwrap();
    assert_eq!(attempt, 1);
}

#[tokio::test]
async fn api_errors_count_as_not_ready_until_budget_runs_out() {
    let port = serve_http("500 Internal Server Error", "{}").await;
    let sup = supervisor_on_port(port);

    let err = sup
        .wait_until_api_responsive(ReadinessPolicy::new(2, Duration::from_millis(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, SupervisorError::Readiness(_)));
}
