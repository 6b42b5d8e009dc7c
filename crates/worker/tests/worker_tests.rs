//! Worker lifecycle tests against a real dispatcher and a scripted one.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use switchyard_common::config::{DispatcherConfig, WorkerConfig};
use switchyard_common::SwitchyardError;
use switchyard_dispatcher::{Dispatcher, Registry};
use switchyard_proto::JoinRequest;
use switchyard_worker::DispatcherLink;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

async fn start_dispatcher() -> (SocketAddr, Arc<Registry>, CancellationToken, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    let registry = dispatcher.registry();
    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    let handle = tokio::spawn(async move {
        dispatcher.run(listener, token).await.unwrap();
    });
    (addr, registry, shutdown, handle)
}

fn worker_config(dispatcher: SocketAddr) -> WorkerConfig {
    WorkerConfig {
        dispatcher_address: dispatcher.to_string(),
        load_report_interval_secs: 1,
        join_retry_attempts: 3,
        join_retry_delay_ms: 50,
        work_unit_millis: 5,
        ..WorkerConfig::default()
    }
}

async fn start_worker(config: WorkerConfig) -> (u16, CancellationToken, JoinHandle<switchyard_common::Result<()>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(switchyard_worker::run(config, listener, shutdown.clone()));
    (port, shutdown, handle)
}

async fn wait_for<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_worker_joins_serves_and_leaves() {
    let (addr, registry, dispatcher_shutdown, dispatcher) = start_dispatcher().await;
    let (port, worker_shutdown, worker) = start_worker(worker_config(addr)).await;

    wait_for(|| registry.snapshot().iter().any(|w| w.listen_port == port)).await;
    let entry = registry.snapshot().remove(0);
    assert_eq!(entry.balancing_tag, "dynamic");

    // Ask the dispatcher where to go, then follow the redirect
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"REQUEST COMPUTATION 5\n").await.unwrap();
    let mut reply = String::new();
    BufReader::new(stream).read_line(&mut reply).await.unwrap();
    assert_eq!(reply.trim_end(), format!("SERVER_PORT {}", port));

    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(b"COMPUTATION 5\n").await.unwrap();
    let mut output = String::new();
    stream.read_to_string(&mut output).await.unwrap();
    let lines: Vec<_> = output.lines().collect();
    assert_eq!(lines.first(), Some(&"STARTED COMPUTATION estimate=10s"));
    assert_eq!(lines.last(), Some(&"COMPLETE COMPUTATION"));

    worker_shutdown.cancel();
    worker.await.unwrap().unwrap();
    wait_for(|| registry.is_empty()).await;

    dispatcher_shutdown.cancel();
    dispatcher.await.unwrap();
}

#[tokio::test]
async fn test_worker_rejoins_after_dispatcher_drops_it() {
    let fake = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = fake.local_addr().unwrap();
    let (port, shutdown, worker) = start_worker(worker_config(addr)).await;

    for _ in 0..2 {
        let (stream, _) = fake.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        let mut join = String::new();
        stream.read_line(&mut join).await.unwrap();
        assert_eq!(join.trim_end(), format!("join -v dynamic port={}", port));
        stream.get_mut().write_all(b"join_accepted\n").await.unwrap();

        let mut load = String::new();
        stream.read_line(&mut load).await.unwrap();
        assert_eq!(load.trim_end(), "load=0");
        // Dropping the connection mimics an eviction
    }

    shutdown.cancel();
    worker.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_rejected_join_is_not_retried() {
    let fake = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = fake.local_addr().unwrap();

    let script = tokio::spawn(async move {
        let (stream, _) = fake.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        let mut join = String::new();
        stream.read_line(&mut join).await.unwrap();
        stream
            .get_mut()
            .write_all(b"join_rejected invalid port\n")
            .await
            .unwrap();
        // A retry would show up as a second connection
        tokio::time::timeout(Duration::from_millis(300), fake.accept())
            .await
            .is_err()
    });

    let join = JoinRequest {
        balancing_tag: "dynamic".to_string(),
        listen_port: 7000,
    };
    let result =
        DispatcherLink::join_with_retry(&addr.to_string(), &join, 5, Duration::from_millis(20)).await;
    assert!(matches!(result, Err(SwitchyardError::Config(_))));
    assert!(script.await.unwrap());
}

#[tokio::test]
async fn test_join_gives_up_after_configured_attempts() {
    // Bind then drop to get a port nobody listens on
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let (_port, _shutdown, worker) = start_worker(worker_config(addr)).await;

    let result = tokio::time::timeout(Duration::from_secs(5), worker)
        .await
        .expect("worker kept retrying")
        .unwrap();
    assert!(result.unwrap_err().is_disconnect());
}
