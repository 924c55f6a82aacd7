//! End-to-end tests: coordinator and workers over the in-process transport
//!
//! Run with: cargo test -p cluster-executor --test cluster_integration_test

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use cluster_executor::protocol::{
    decode_batch, encode_callback, encode_pull, Outcome, Response, REQUEST_EXEC,
};
use cluster_executor::{
    CallableError, CallablePayload, CallableRegistry, Coordinator, CoordinatorConfig,
    CoordinatorStatus, CustomRequestHandler, DistributedCallable, LocalServer, MessagingClient,
    PollerConfig, SignalHandler, SubmitError, TaskError, TaskId, TaskState, WorkerConfig,
    WorkerDaemon,
};

#[derive(Debug, Serialize, Deserialize)]
struct Echo {
    text: String,
}

#[async_trait]
impl DistributedCallable for Echo {
    const NAME: &'static str = "echo";
    type Output = String;

    async fn call(self) -> Result<String, CallableError> {
        Ok(self.text)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Divide {
    a: i64,
    b: i64,
}

#[async_trait]
impl DistributedCallable for Divide {
    const NAME: &'static str = "divide";
    type Output = i64;

    async fn call(self) -> Result<i64, CallableError> {
        if self.b == 0 {
            return Err(CallableError::new("DivideByZero", "division by zero"));
        }
        Ok(self.a / self.b)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Sleep {
    millis: u64,
}

#[async_trait]
impl DistributedCallable for Sleep {
    const NAME: &'static str = "sleep";
    type Output = u64;

    async fn call(self) -> Result<u64, CallableError> {
        tokio::time::sleep(Duration::from_millis(self.millis)).await;
        Ok(self.millis)
    }
}

fn registry() -> CallableRegistry {
    let mut registry = CallableRegistry::new();
    registry
        .register::<Echo>()
        .register::<Divide>()
        .register::<Sleep>();
    registry
}

fn coordinator_config() -> CoordinatorConfig {
    CoordinatorConfig::new().with_exec_signal_interval(Duration::from_millis(20))
}

fn worker_config(capacity: usize) -> WorkerConfig {
    WorkerConfig::new(capacity)
        .with_shutdown_timeout(Duration::from_secs(5))
        .with_poller(
            PollerConfig::new()
                .with_min_interval(Duration::from_millis(20))
                .with_max_interval(Duration::from_millis(200)),
        )
}

async fn start_coordinator() -> (LocalServer, Coordinator) {
    let server = LocalServer::new();
    let coordinator = Coordinator::new(Arc::new(server.clone()), coordinator_config());
    coordinator.start().await.unwrap();
    (server, coordinator)
}

async fn start_worker(server: &LocalServer, capacity: usize) -> WorkerDaemon {
    let worker = WorkerDaemon::new(
        worker_config(capacity),
        registry(),
        Arc::new(server.client()),
    );
    worker.start().await.unwrap();
    worker
}

const WAIT: Duration = Duration::from_secs(5);

// ============================================
// Round trips
// ============================================

#[test_log::test(tokio::test)]
async fn test_echo_round_trip() {
    let (server, coordinator) = start_coordinator().await;
    let worker = start_worker(&server, 2).await;

    let future = coordinator
        .submit(Echo {
            text: "ok".to_string(),
        })
        .unwrap();

    assert_eq!(future.get_timeout(WAIT).await, Ok("ok".to_string()));
    assert_eq!(future.state(), TaskState::Normal);
    assert_eq!(coordinator.queue().running_size(), 0);

    worker.shutdown().await.unwrap();
    coordinator.shutdown();
    assert!(coordinator.await_termination(WAIT).await);
}

#[test_log::test(tokio::test)]
async fn test_callable_error_surfaces_as_execution_failure() {
    let (server, coordinator) = start_coordinator().await;
    let worker = start_worker(&server, 1).await;

    let future = coordinator.submit(Divide { a: 1, b: 0 }).unwrap();

    match future.get_timeout(WAIT).await {
        Err(TaskError::Execution(e)) => {
            assert_eq!(e.kind, "DivideByZero");
            assert_eq!(e.message, "division by zero");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(future.state(), TaskState::Exceptional);

    worker.shutdown().await.unwrap();
    coordinator.shutdown();
}

#[test_log::test(tokio::test)]
async fn test_many_tasks_across_workers() {
    let (server, coordinator) = start_coordinator().await;
    let workers = vec![
        start_worker(&server, 2).await,
        start_worker(&server, 3).await,
    ];

    let futures: Vec<_> = (0..20)
        .map(|n| coordinator.submit(Divide { a: n * 10, b: 10 }).unwrap())
        .collect();

    for (n, future) in futures.iter().enumerate() {
        assert_eq!(future.get_timeout(WAIT).await, Ok(n as i64));
    }
    assert_eq!(coordinator.queue().pending_size(), 0);
    assert_eq!(coordinator.queue().running_size(), 0);

    for worker in &workers {
        worker.shutdown().await.unwrap();
        assert_eq!(worker.available(), worker.capacity());
    }
    coordinator.shutdown();
}

#[test_log::test(tokio::test)]
async fn test_unknown_callable_is_reported() {
    let (server, coordinator) = start_coordinator().await;
    let worker = start_worker(&server, 1).await;

    let future = coordinator
        .submit_payload(CallablePayload::new("translate", json!({"text": "ciao"})))
        .unwrap();

    match future.get_timeout(WAIT).await {
        Err(TaskError::Execution(e)) => assert_eq!(e.kind, "UnknownCallable"),
        other => panic!("unexpected outcome: {other:?}"),
    }

    worker.shutdown().await.unwrap();
    coordinator.shutdown();
}

// ============================================
// Pull protocol, driven by hand
// ============================================

#[test_log::test(tokio::test)]
async fn test_cancel_before_pull() {
    let (server, coordinator) = start_coordinator().await;
    let client = server.client();

    let future = coordinator.submit(Echo { text: "x".into() }).unwrap();
    assert!(future.cancel(false));

    let batch = decode_batch(&client.request(encode_pull(1)).await.unwrap()).unwrap();
    assert!(batch.is_empty());
    assert_eq!(future.get().await, Err(TaskError::Cancelled));
    assert_eq!(future.state(), TaskState::Cancelled);

    coordinator.shutdown();
}

#[test_log::test(tokio::test)]
async fn test_pull_respects_declared_slots() {
    let (server, coordinator) = start_coordinator().await;
    let client = server.client();

    let futures: Vec<_> = (0..5)
        .map(|n| coordinator.submit(Divide { a: n, b: 1 }).unwrap())
        .collect();

    let first = decode_batch(&client.request(encode_pull(3)).await.unwrap()).unwrap();
    assert_eq!(first.len(), 3);
    assert_eq!(coordinator.queue().running_size(), 3);

    let second = decode_batch(&client.request(vec![REQUEST_EXEC, 10]).await.unwrap()).unwrap();
    assert_eq!(second.len(), 2);

    let ids: Vec<TaskId> = first.iter().chain(&second).map(|r| r.id).collect();
    let expected: Vec<TaskId> = futures.iter().map(|f| f.id()).collect();
    assert_eq!(ids, expected);

    coordinator.shutdown();
}

#[test_log::test(tokio::test)]
async fn test_callback_piggybacks_next_request() {
    let (server, coordinator) = start_coordinator().await;
    let client = server.client();

    let first = coordinator.submit(Divide { a: 4, b: 2 }).unwrap();
    let second = coordinator.submit(Divide { a: 9, b: 3 }).unwrap();

    let batch = decode_batch(&client.request(encode_pull(1)).await.unwrap()).unwrap();
    assert_eq!(batch[0].id, first.id());

    let response = Response::new(first.id(), Ok(json!(2)));
    let reply = client
        .request(encode_callback(&response).unwrap())
        .await
        .unwrap();

    let next = decode_batch(&reply).unwrap();
    assert_eq!(next.len(), 1);
    assert_eq!(next[0].id, second.id());
    assert_eq!(first.get_timeout(WAIT).await, Ok(2));

    coordinator.shutdown();
}

#[test_log::test(tokio::test)]
async fn test_unknown_response_is_discarded() {
    let (server, coordinator) = start_coordinator().await;
    let client = server.client();

    let future = coordinator.submit(Echo { text: "x".into() }).unwrap();
    decode_batch(&client.request(encode_pull(1)).await.unwrap()).unwrap();

    let stray = Response {
        id: TaskId(uuid::Uuid::now_v7()),
        outcome: Outcome::Value(json!("stray")),
    };
    client
        .request(encode_callback(&stray).unwrap())
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(future.state(), TaskState::New);
    assert!(coordinator.queue().is_running(&future.id()));

    coordinator.shutdown();
}

#[test_log::test(tokio::test)]
async fn test_late_response_after_cancel_is_discarded() {
    let (server, coordinator) = start_coordinator().await;
    let client = server.client();

    let future = coordinator.submit(Echo { text: "x".into() }).unwrap();
    decode_batch(&client.request(encode_pull(1)).await.unwrap()).unwrap();
    assert!(future.cancel(true));

    let late = Response::new(future.id(), Ok(json!("x")));
    client.request(encode_callback(&late).unwrap()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(future.state(), TaskState::Interrupted);
    assert_eq!(future.get().await, Err(TaskError::Cancelled));

    coordinator.shutdown();
}

// ============================================
// Notifier and shutdown
// ============================================

#[test_log::test(tokio::test)]
async fn test_notifier_only_signals_pending_work() {
    let (server, coordinator) = start_coordinator().await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.broadcasts_sent(), 0);

    coordinator.submit(Echo { text: "x".into() }).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.broadcasts_sent() >= 1);

    coordinator.shutdown();
}

#[test_log::test(tokio::test)]
async fn test_shutdown_cancels_everything() {
    let (server, coordinator) = start_coordinator().await;
    let client = server.client();

    let running = coordinator.submit(Sleep { millis: 1 }).unwrap();
    decode_batch(&client.request(encode_pull(1)).await.unwrap()).unwrap();
    let pending: Vec<_> = (0..2)
        .map(|_| coordinator.submit(Sleep { millis: 1 }).unwrap())
        .collect();

    coordinator.shutdown();

    assert_eq!(running.get().await, Err(TaskError::Cancelled));
    for future in &pending {
        assert_eq!(future.get().await, Err(TaskError::Cancelled));
    }
    assert!(coordinator.await_termination(WAIT).await);
    assert_eq!(coordinator.status(), CoordinatorStatus::Terminated);
    assert!(!server.is_bound());

    assert!(matches!(
        coordinator.submit(Sleep { millis: 1 }),
        Err(SubmitError::Rejected)
    ));
}

#[test_log::test(tokio::test)]
async fn test_worker_drains_in_flight_work() {
    let (server, coordinator) = start_coordinator().await;
    let worker = start_worker(&server, 2).await;

    let future = coordinator.submit(Sleep { millis: 100 }).unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(worker.available(), 1);

    worker.shutdown().await.unwrap();
    assert_eq!(future.get_timeout(WAIT).await, Ok(100));

    coordinator.shutdown();
}

#[test_log::test(tokio::test)]
async fn test_draining_worker_runs_piggybacked_request() {
    let (server, coordinator) = start_coordinator().await;
    let worker = start_worker(&server, 1).await;

    let first = coordinator.submit(Sleep { millis: 100 }).unwrap();
    tokio::time::timeout(WAIT, async {
        while worker.available() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    let second = coordinator.submit(Sleep { millis: 10 }).unwrap();
    worker.shutdown().await.unwrap();

    assert_eq!(first.get_timeout(WAIT).await, Ok(100));
    assert_eq!(second.get_timeout(WAIT).await, Ok(10));
    assert_eq!(coordinator.queue().pending_size(), 0);
    assert_eq!(coordinator.queue().running_size(), 0);

    coordinator.shutdown();
}

// ============================================
// Custom traffic
// ============================================

struct Version;

impl CustomRequestHandler for Version {
    fn on_custom_request(&self, signal: u8, _payload: &[u8]) -> Vec<u8> {
        vec![signal, 4, 2]
    }
}

#[derive(Default)]
struct Collector {
    signals: parking_lot::Mutex<Vec<(u8, Vec<u8>)>>,
}

impl SignalHandler for Collector {
    fn on_signal(&self, signal: u8, payload: &[u8]) {
        self.signals.lock().push((signal, payload.to_vec()));
    }
}

#[test_log::test(tokio::test)]
async fn test_custom_request_and_signal() {
    let (server, coordinator) = start_coordinator().await;
    coordinator.set_custom_handler(Arc::new(Version));

    let worker = WorkerDaemon::new(worker_config(1), registry(), Arc::new(server.client()));
    let collector = Arc::new(Collector::default());
    worker.set_signal_handler(collector.clone());
    worker.start().await.unwrap();

    let reply = server.client().request(vec![0x10]).await.unwrap();
    assert_eq!(reply, vec![0x10, 4, 2]);

    coordinator
        .send_broadcast_signal(0x20, b"reload")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        collector.signals.lock().clone(),
        vec![(0x20, b"reload".to_vec())]
    );

    worker.shutdown().await.unwrap();
    coordinator.shutdown();
}
