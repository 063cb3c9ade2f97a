//! Heartbeat-driven liveness and failover behavior.

use std::collections::HashSet;
use std::time::Duration;

use conductor_core::WorkerId;
use conductor_engine::{DispatchEngine, EngineConfig};
use conductor_queue::{JobPayload, JobStatus, Priority};
use conductor_registry::WorkerStatus;

fn caps(list: &[&str]) -> HashSet<String> {
    list.iter().map(|c| c.to_string()).collect()
}

async fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
    for _ in 0..400 {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_worker_is_disconnected_and_its_job_requeued() {
    let engine = DispatchEngine::new(
        EngineConfig::builder()
            .rate_limit(1000.0)
            .heartbeat_interval(Duration::from_millis(50))
            .heartbeat_miss_threshold(2)
            .processing_timeout(Duration::from_secs(30))
            .build(),
    );
    let w1 = WorkerId::from("w1");
    engine
        .registry()
        .register(w1.clone(), caps(&["download"]), serde_json::Value::Null);

    let handle = engine.start();
    let item = engine
        .enqueue(JobPayload::new("https://x/1.jpg"), Priority::Normal)
        .unwrap();

    let queue = engine.queue().clone();
    let id = item.id.clone();
    wait_for("dispatch", || {
        queue
            .status(&id)
            .map(|item| item.status == JobStatus::Processing)
            .unwrap_or(false)
    })
    .await;

    // The worker never heartbeats. Two quiet intervals later it is
    // disconnected, and with no other candidate the job returns to its
    // bucket immediately dispatchable.
    let registry = engine.registry().clone();
    let w1_clone = w1.clone();
    wait_for("worker disconnect", || {
        registry
            .get(&w1_clone)
            .map(|worker| worker.status == WorkerStatus::Disconnected)
            .unwrap_or(true)
    })
    .await;

    let queue = engine.queue().clone();
    let id = item.id.clone();
    wait_for("requeue", || {
        queue
            .status(&id)
            .map(|item| item.status == JobStatus::Pending && item.reroutes == 1)
            .unwrap_or(false)
    })
    .await;

    // A healthy replacement picks the job up and finishes it.
    let w2 = WorkerId::from("w2");
    engine
        .registry()
        .register(w2.clone(), caps(&["download"]), serde_json::Value::Null);

    let heartbeat_registry = engine.registry().clone();
    let w2_clone = w2.clone();
    let heartbeats = tokio::spawn(async move {
        loop {
            let _ = heartbeat_registry.heartbeat(&w2_clone, true);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    let queue = engine.queue().clone();
    let id = item.id.clone();
    let w2_owner = w2.clone();
    wait_for("redispatch", || {
        queue
            .status(&id)
            .map(|item| {
                item.status == JobStatus::Processing && item.owner.as_ref() == Some(&w2_owner)
            })
            .unwrap_or(false)
    })
    .await;

    engine.complete(&item.id, None).unwrap();
    let done = engine.queue().status(&item.id).unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.attempts, 2);

    heartbeats.abort();
    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn heartbeats_keep_a_worker_alive() {
    let engine = DispatchEngine::new(
        EngineConfig::builder()
            .heartbeat_interval(Duration::from_millis(50))
            .heartbeat_miss_threshold(2)
            .build(),
    );
    let w1 = WorkerId::from("w1");
    engine
        .registry()
        .register(w1.clone(), caps(&["download"]), serde_json::Value::Null);

    let handle = engine.start();

    let registry = engine.registry().clone();
    let w1_clone = w1.clone();
    let heartbeats = tokio::spawn(async move {
        loop {
            let _ = registry.heartbeat(&w1_clone, true);
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    });

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(
        engine.registry().get(&w1).unwrap().status,
        WorkerStatus::Connected
    );

    heartbeats.abort();
    handle.stop().await;
}
