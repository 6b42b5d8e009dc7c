//! End-to-end: dispatcher, two simulated workers and the load test driver.

use std::time::Duration;

use switchyard_client::{run_load_test, DispatcherClient, RequestOutcome};
use switchyard_common::config::{ClientConfig, DispatcherConfig, WorkerConfig};
use switchyard_dispatcher::Dispatcher;
use switchyard_proto::RequestLine;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_load_test_spreads_over_workers() {
    let shutdown = CancellationToken::new();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dispatcher = Dispatcher::new(DispatcherConfig::default());
    let registry = dispatcher.registry();
    let dispatcher = tokio::spawn(dispatcher.run(listener, shutdown.clone()));

    let mut workers = Vec::new();
    let mut ports = Vec::new();
    for _ in 0..2 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        ports.push(listener.local_addr().unwrap().port());
        let config = WorkerConfig {
            dispatcher_address: addr.to_string(),
            join_retry_delay_ms: 50,
            work_unit_millis: 2,
            ..WorkerConfig::default()
        };
        workers.push(tokio::spawn(switchyard_worker::run(
            config,
            listener,
            shutdown.child_token(),
        )));
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("workers did not join");

    let client = DispatcherClient::new(ClientConfig {
        dispatcher_address: addr.to_string(),
        ..ClientConfig::default()
    });

    let single = client
        .execute(&RequestLine::parse("FILE_TRANSFER report.pdf").unwrap())
        .await
        .unwrap();
    assert!(single.is_complete());

    // Unrecognized kinds are routed and run like any other request
    let custom = client
        .execute(&RequestLine::parse("SEND_REPORT q3.pdf").unwrap())
        .await
        .unwrap();
    match &custom {
        RequestOutcome::Served { lines, .. } => {
            assert_eq!(lines.first().map(String::as_str), Some("STARTED SEND_REPORT estimate=1s"));
            assert_eq!(lines.last().map(String::as_str), Some("COMPLETE SEND_REPORT"));
        }
        other => panic!("expected a served request, got {:?}", other),
    }
    assert!(custom.is_complete());

    let report = run_load_test(client, 4, 8).await.unwrap();
    assert_eq!(report.total(), 8);
    assert_eq!(report.completed, 8);
    assert_eq!(report.unassigned, 0);
    for port in &ports {
        assert!(report.per_port.contains_key(port), "port {} unused", port);
    }

    shutdown.cancel();
    for worker in workers {
        worker.await.unwrap().unwrap();
    }
    dispatcher.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_requests_without_workers_are_unassigned() {
    let shutdown = CancellationToken::new();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let dispatcher = tokio::spawn(Dispatcher::new(DispatcherConfig::default()).run(listener, shutdown.clone()));

    let client = DispatcherClient::new(ClientConfig {
        dispatcher_address: addr.to_string(),
        ..ClientConfig::default()
    });

    let outcome = client
        .execute(&RequestLine::parse("COMPUTATION 5").unwrap())
        .await
        .unwrap();
    assert_eq!(outcome, RequestOutcome::NoServerAvailable);

    let report = run_load_test(client, 2, 4).await.unwrap();
    assert_eq!(report.unassigned, 4);
    assert!(report.per_port.is_empty());

    shutdown.cancel();
    dispatcher.await.unwrap().unwrap();
}
