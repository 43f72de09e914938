#![cfg(unix)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use stove::rotation::{RelayListener, RetireOutcome, RotationController};
use stove::stove::Shutdown;
use stove::{ConfigSource, StoveConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const DEMO_WORKER: &str = env!("CARGO_BIN_EXE_stove-demo-worker");

struct SharedSource(Mutex<StoveConfig>);

impl ConfigSource for SharedSource {
    fn load(&self) -> stove::Result<StoveConfig> {
        Ok(self.0.lock().unwrap().clone())
    }
}

fn demo_config(tag: &str) -> StoveConfig {
    StoveConfig {
        host: "127.0.0.1".into(),
        port: 0,
        workers: 1,
        timeout: 2.0,
        command: vec![
            DEMO_WORKER.into(),
            "--host".into(),
            "{host}".into(),
            "--port".into(),
            "{port}".into(),
            "--tag".into(),
            tag.into(),
        ],
        ..Default::default()
    }
}

struct Harness {
    controller: RotationController,
    source: Arc<SharedSource>,
    relay_addr: std::net::SocketAddr,
    shutdown: Shutdown,
    relay_task: JoinHandle<stove::Result<()>>,
}

impl Harness {
    async fn start(config: StoveConfig) -> Self {
        let source = Arc::new(SharedSource(Mutex::new(config.clone())));
        let controller = RotationController::new(source.clone(), &config);
        let relay = RelayListener::bind("127.0.0.1:0", controller.live_target())
            .await
            .unwrap();
        let relay_addr = relay.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let waiter = shutdown.clone();
        let relay_task = tokio::spawn(async move { relay.run(waiter.wait()).await });
        Self {
            controller,
            source,
            relay_addr,
            shutdown,
            relay_task,
        }
    }

    async fn stop(mut self) {
        self.controller.shutdown().await;
        self.shutdown.trigger();
        self.relay_task.await.unwrap().unwrap();
    }
}

/// One request through the relay; empty when the connection was dropped.
async fn request(addr: std::net::SocketAddr) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    if stream
        .write_all(b"GET / HTTP/1.0\r\nHost: test\r\n\r\n")
        .await
        .is_err()
    {
        return String::new();
    }
    let mut response = Vec::new();
    let _ = stream.read_to_end(&mut response).await;
    String::from_utf8_lossy(&response).into_owned()
}

/// Retry until the freshly spawned worker has bound its port.
async fn request_until_served(addr: std::net::SocketAddr) -> String {
    for _ in 0..100 {
        let response = request(addr).await;
        if !response.is_empty() {
            return response;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("worker never answered through the relay");
}

#[tokio::test]
async fn single_worker_serves_full_response() {
    let mut harness = Harness::start(demo_config("alpha")).await;

    let report = harness.controller.rotate().await.unwrap();
    let port = report.spawned[0].port;
    assert!(port >= 49152);

    let response = request_until_served(harness.relay_addr).await;
    assert!(response.starts_with("HTTP/1.0 200 OK"));
    assert!(response.ends_with(&format!("alpha {port}\n")));

    harness.stop().await;
}

#[tokio::test]
async fn second_rotation_moves_clients_to_new_port() {
    let mut harness = Harness::start(demo_config("one")).await;

    let first = harness.controller.rotate().await.unwrap();
    let old_port = first.spawned[0].port;
    request_until_served(harness.relay_addr).await;

    *harness.source.0.lock().unwrap() = demo_config("two");
    let second = harness.controller.rotate().await.unwrap();
    let new_port = second.spawned[0].port;

    assert_ne!(new_port, old_port);
    assert_eq!(second.retired.len(), 1);
    assert_eq!(second.retired[0].1, RetireOutcome::Graceful);

    let response = request_until_served(harness.relay_addr).await;
    assert!(response.ends_with(&format!("two {new_port}\n")));

    harness.stop().await;
}

#[tokio::test]
async fn stubborn_worker_is_killed_and_pointer_still_advances() {
    let mut config = demo_config("stubborn");
    config.command.push("--ignore-sigterm".into());
    config.timeout = 0.3;
    let mut harness = Harness::start(config).await;

    let first = harness.controller.rotate().await.unwrap();
    request_until_served(harness.relay_addr).await;

    *harness.source.0.lock().unwrap() = demo_config("fresh");
    let second = harness.controller.rotate().await.unwrap();

    assert_eq!(second.forced_kills(), 1);
    assert_eq!(second.retired[0].0, first.spawned[0]);
    assert_eq!(harness.controller.live().as_ref(), second.spawned.last());

    let response = request_until_served(harness.relay_addr).await;
    assert!(response.contains("fresh"));

    harness.stop().await;
}

#[tokio::test]
async fn connection_before_first_rotation_fails_fast() {
    let harness = Harness::start(demo_config("unused")).await;
    assert!(harness.controller.live().is_none());

    let response = tokio::time::timeout(Duration::from_secs(2), request(harness.relay_addr))
        .await
        .expect("relay must not hang without an upstream");
    assert!(response.is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn runner_serves_and_reloads_on_trigger() {
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let mut config = demo_config("runner");
    config.port = port;
    config.debounce_ms = 20;

    let app = stove::Stove::new(Arc::new(config)).unwrap().without_watcher();
    let (triggers, receiver) = stove::trigger::channel();
    let shutdown = Shutdown::new();
    let runner = {
        let triggers = triggers.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { app.run_until(triggers, receiver, shutdown).await })
    };

    let addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let mut first = String::new();
    for _ in 0..100 {
        if let Ok(Ok(stream)) =
            tokio::time::timeout(Duration::from_millis(200), TcpStream::connect(addr)).await
        {
            drop(stream);
            first = request_until_served(addr).await;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(first.contains("runner"), "unexpected response: {first:?}");

    triggers.fire(stove::trigger::ReloadReason::Manual);
    let mut rotated = false;
    for _ in 0..100 {
        let response = request(addr).await;
        if !response.is_empty() && response != first {
            rotated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(rotated, "manual trigger should move traffic to a new worker");

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(10), runner)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn runner_stops_with_idle_client_connected() {
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let mut config = demo_config("idle");
    config.port = port;
    config.debounce_ms = 20;

    let app = stove::Stove::new(Arc::new(config)).unwrap().without_watcher();
    let (triggers, receiver) = stove::trigger::channel();
    let shutdown = Shutdown::new();
    let runner = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { app.run_until(triggers, receiver, shutdown).await })
    };

    let addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let mut served = String::new();
    for _ in 0..100 {
        if TcpStream::connect(addr).await.is_ok() {
            served = request_until_served(addr).await;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(served.contains("idle"), "unexpected response: {served:?}");

    let _silent = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("runner should stop while a client sits idle")
        .unwrap()
        .unwrap();
}
