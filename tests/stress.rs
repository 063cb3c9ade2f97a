//! Concurrent hammering of the queue's transition paths.
//!
//! Run with: cargo test --test stress

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use conductor_core::WorkerId;
use conductor_queue::{DispatchQueue, JobError, JobPayload, Priority, QueueConfig};
use rand::Rng;

#[test]
fn transitions_stay_consistent_under_contention() {
    let queue = Arc::new(DispatchQueue::new(
        QueueConfig::builder()
            .max_queue_size(10_000)
            .max_attempts(2)
            .retry_delays(vec![Duration::from_millis(0)])
            .build(),
    ));

    let threads: Vec<_> = (0..8)
        .map(|index| {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || {
                let worker = WorkerId::from(format!("w{index}"));
                let mut rng = rand::rng();
                for _ in 0..500 {
                    match rng.random_range(0..4u8) {
                        0 => {
                            let priority = match rng.random_range(0..3u8) {
                                0 => Priority::High,
                                1 => Priority::Normal,
                                _ => Priority::Low,
                            };
                            let _ = queue.enqueue(JobPayload::new("https://x/s.jpg"), priority);
                        }
                        1 => {
                            if let Some(item) = queue.take_next(Utc::now()) {
                                if queue.start(&item.id, &worker).is_ok() {
                                    let _ = queue.complete(&item.id, None);
                                }
                            }
                        }
                        2 => {
                            if let Some(item) = queue.take_next(Utc::now()) {
                                if queue.start(&item.id, &worker).is_ok() {
                                    // Deliberately race completion and failure.
                                    let _ = queue.fail(&item.id, JobError::new("boom"));
                                    let _ = queue.complete(&item.id, None);
                                }
                            }
                        }
                        _ => {
                            if let Some(item) = queue.dlq_items().first() {
                                let _ = queue.dlq_retry(&item.id);
                            }
                        }
                    }
                }
            })
        })
        .collect();

    for thread in threads {
        thread.join().expect("worker thread panicked");
    }

    let metrics = queue.metrics();
    let live =
        (metrics.high + metrics.normal + metrics.low + metrics.processing + metrics.dlq) as u64;
    assert_eq!(
        metrics.total_processed + metrics.total_cancelled + metrics.total_dlq_cleared + live,
        metrics.total_enqueued,
        "conservation violated after contention: {metrics:?}"
    );
    // Nothing is left processing once every thread has finished its loop.
    assert_eq!(metrics.processing, 0);
}
