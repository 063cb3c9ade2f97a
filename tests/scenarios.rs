//! End-to-end dispatch scenarios, each against a fresh in-process core.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use conductor_bus::{kinds, Event, SubscribeOptions};
use conductor_core::WorkerId;
use conductor_engine::{DispatchEngine, EngineConfig, EngineError};
use conductor_queue::{JobError, JobPayload, JobStatus, Priority, QueueError};
use conductor_ratelimiter::{AdmissionLimiter, Admission, RateLimiterConfig, Tier, Window};
use tokio::sync::mpsc;

fn caps(list: &[&str]) -> HashSet<String> {
    list.iter().map(|c| c.to_string()).collect()
}

/// Registers a worker and returns the channel its frames arrive on.
fn connect_worker(engine: &DispatchEngine, id: &str) -> mpsc::UnboundedReceiver<Event> {
    let worker_id = WorkerId::from(id);
    engine
        .registry()
        .register(worker_id.clone(), caps(&["download"]), serde_json::Value::Null);
    let (tx, rx) = mpsc::unbounded_channel();
    engine.bridge().register(worker_id, tx);
    rx
}

async fn next_dispatch(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for dispatch")
            .expect("worker channel closed");
        if event.kind == kinds::QUEUE_PROCESS {
            return event;
        }
    }
}

fn fast_config() -> conductor_engine::EngineConfigBuilder {
    EngineConfig::builder()
        .rate_limit(1000.0)
        .retry_delays(vec![Duration::from_millis(10), Duration::from_millis(20)])
        .processing_timeout(Duration::from_secs(10))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_path_download() {
    let engine = DispatchEngine::new(fast_config().build());
    let mut w1 = connect_worker(&engine, "w1");
    let handle = engine.start();

    let item = engine
        .enqueue(JobPayload::new("https://x/1.jpg"), Priority::Normal)
        .unwrap();
    assert_eq!(item.status, JobStatus::Pending);

    let dispatch = next_dispatch(&mut w1).await;
    assert_eq!(dispatch.job_id().unwrap(), item.id);

    engine
        .complete(&item.id, Some(serde_json::json!({"path": "/tmp/1.jpg"})))
        .unwrap();

    let done = engine.queue().status(&item.id).unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(engine.queue().metrics().total_processed, 1);
    assert_eq!(
        engine
            .registry()
            .get(&WorkerId::from("w1"))
            .unwrap()
            .active_requests,
        0
    );

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retry_twice_then_complete() {
    let engine = DispatchEngine::new(fast_config().max_attempts(3).build());
    let mut w1 = connect_worker(&engine, "w1");
    let handle = engine.start();

    let item = engine
        .enqueue(JobPayload::new("https://x/2.jpg"), Priority::Normal)
        .unwrap();

    for attempt in 1..=3u32 {
        let dispatch = next_dispatch(&mut w1).await;
        assert_eq!(dispatch.job_id().unwrap(), item.id);
        assert_eq!(dispatch.data["attempt"], attempt);
        if attempt < 3 {
            engine
                .fail(&item.id, JobError::with_code("timed out", "ETIMEDOUT"))
                .unwrap();
        } else {
            engine.complete(&item.id, None).unwrap();
        }
    }

    let done = engine.queue().status(&item.id).unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.attempts, 3);
    let metrics = engine.queue().metrics();
    assert_eq!(metrics.total_processed, 1);
    assert_eq!(metrics.dlq, 0);

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhaustion_moves_to_dlq_with_one_event() {
    let engine = DispatchEngine::new(fast_config().max_attempts(3).build());

    let dlq_events = Arc::new(AtomicUsize::new(0));
    let dlq_events_clone = Arc::clone(&dlq_events);
    engine.bus().subscribe(
        kinds::QUEUE_ITEM_DLQ,
        SubscribeOptions::default(),
        move |_| {
            let count = Arc::clone(&dlq_events_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
    );

    let mut w1 = connect_worker(&engine, "w1");
    let handle = engine.start();

    let item = engine
        .enqueue(JobPayload::new("https://x/3.jpg"), Priority::Normal)
        .unwrap();

    for _ in 0..3 {
        next_dispatch(&mut w1).await;
        engine
            .fail(&item.id, JobError::with_code("boom", "EFAIL"))
            .unwrap();
    }

    let dead = engine.queue().status(&item.id).unwrap();
    assert_eq!(dead.status, JobStatus::Dead);
    let metrics = engine.queue().metrics();
    assert_eq!(metrics.dlq, 1);
    assert_eq!(metrics.total_processed, 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(dlq_events.load(Ordering::SeqCst), 1);

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn capacity_rejects_fourth_and_raises_edge_once() {
    let engine = DispatchEngine::new(
        EngineConfig::builder()
            .max_queue_size(3)
            .max_concurrent(0)
            .build(),
    );

    let capacity_events = Arc::new(AtomicUsize::new(0));
    let capacity_events_clone = Arc::clone(&capacity_events);
    engine.bus().subscribe(
        kinds::QUEUE_CAPACITY_REACHED,
        SubscribeOptions::default(),
        move |_| {
            let count = Arc::clone(&capacity_events_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        },
    );

    let handle = engine.start();

    for index in 0..3 {
        engine
            .enqueue(
                JobPayload::new(format!("https://x/{index}.jpg")),
                Priority::Normal,
            )
            .unwrap();
    }
    let fourth = engine.enqueue(JobPayload::new("https://x/4.jpg"), Priority::Normal);
    assert!(matches!(
        fourth,
        Err(EngineError::Queue(QueueError::CapacityExceeded {
            max_queue_size: 3
        }))
    ));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(capacity_events.load(Ordering::SeqCst), 1);

    handle.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failover_reroutes_to_second_worker() {
    let engine = DispatchEngine::new(fast_config().build());
    let mut w1 = connect_worker(&engine, "w1");
    let handle = engine.start();

    let item = engine
        .enqueue(JobPayload::new("https://x/5.jpg"), Priority::Normal)
        .unwrap();
    next_dispatch(&mut w1).await;

    // A second worker joins, then the owner disconnects before completing.
    let mut w2 = connect_worker(&engine, "w2");
    engine.bridge().unregister(&WorkerId::from("w1"));
    engine
        .registry()
        .deregister(&WorkerId::from("w1"), "socket closed")
        .unwrap();

    let redispatch = next_dispatch(&mut w2).await;
    assert_eq!(redispatch.job_id().unwrap(), item.id);

    engine.complete(&item.id, None).unwrap();
    let done = engine.queue().status(&item.id).unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.reroutes, 1);
    assert_eq!(done.attempts, 2);

    handle.stop().await;
}

#[tokio::test]
async fn free_tier_login_limit_is_ten_per_minute() {
    let limiter = AdmissionLimiter::new(RateLimiterConfig::builder().build());
    let start = std::time::Instant::now();

    // Ten admissions spread over the minute; the burst window never trips.
    for step in 0..10u64 {
        let now = start + Duration::from_secs(step * 5);
        assert!(
            limiter
                .admit_at("client-1", "/auth/login", Tier::Free, now)
                .is_admitted(),
            "admission {step} should pass"
        );
    }

    let eleventh = limiter.admit_at(
        "client-1",
        "/auth/login",
        Tier::Free,
        start + Duration::from_secs(55),
    );
    match eleventh {
        Admission::Rejected {
            window,
            retry_after,
            ..
        } => {
            assert_eq!(window, Window::Minute);
            let wait = retry_after.expect("retry_after should be computable");
            assert!(wait > Duration::ZERO && wait <= Duration::from_secs(60));
        }
        Admission::Admitted => panic!("eleventh admission should be rejected"),
    }
}
