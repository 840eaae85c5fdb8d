//! Work queue scheduling across concurrent workers

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chartsource::controller::handle_outcome;
use chartsource::models::ObjectKey;
use chartsource::{Action, RetryPolicy, WorkQueue};

fn key(name: &str) -> ObjectKey {
    ObjectKey::new("default", name)
}

#[tokio::test]
async fn test_failed_key_returns_after_backoff() {
    let queue = Arc::new(WorkQueue::new(RetryPolicy {
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(80),
    }));

    let delays: Vec<Duration> = (0..4).map(|_| queue.add_rate_limited(key("a"))).collect();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(20),
            Duration::from_millis(40),
            Duration::from_millis(80),
            Duration::from_millis(80),
        ]
    );
    assert_eq!(queue.failures(&key("a")), 4);

    let start = Instant::now();
    let next = tokio::time::timeout(Duration::from_secs(5), queue.get())
        .await
        .expect("key requeued");
    assert_eq!(next, Some(key("a")));
    assert!(start.elapsed() >= Duration::from_millis(15));

    queue.forget(&key("a"));
    assert_eq!(queue.failures(&key("a")), 0);
    assert_eq!(queue.add_rate_limited(key("a")), Duration::from_millis(20));
}

#[tokio::test]
async fn test_delayed_add_lands_in_queue() {
    let queue = Arc::new(WorkQueue::default());
    queue.add_after(key("a"), Duration::from_millis(30));
    assert!(queue.is_empty());

    let next = tokio::time::timeout(Duration::from_secs(5), queue.get())
        .await
        .expect("delayed key delivered");
    assert_eq!(next, Some(key("a")));

    queue.add_after(key("b"), Duration::ZERO);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_immediate_add_cancels_pending_delay() {
    let queue = Arc::new(WorkQueue::default());
    queue.add_after(key("a"), Duration::from_millis(60));
    assert!(queue.is_waiting(&key("a")));

    queue.add(key("a"));
    assert!(!queue.is_waiting(&key("a")));
    assert_eq!(queue.get().await, Some(key("a")));
    queue.done(&key("a"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_earliest_deadline_wins() {
    let queue = Arc::new(WorkQueue::default());
    let start = Instant::now();
    queue.add_after(key("a"), Duration::from_millis(300));
    queue.add_after(key("a"), Duration::from_millis(30));
    // A later deadline never pushes back an earlier one
    queue.add_after(key("a"), Duration::from_millis(500));

    let next = tokio::time::timeout(Duration::from_secs(5), queue.get())
        .await
        .expect("key delivered");
    assert_eq!(next, Some(key("a")));
    assert!(start.elapsed() < Duration::from_millis(250));
    queue.done(&key("a"));
    assert!(!queue.is_waiting(&key("a")));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_periodic_requeue_does_not_multiply() {
    let queue = Arc::new(WorkQueue::default());
    let passes = Arc::new(AtomicUsize::new(0));

    let worker = {
        let queue = queue.clone();
        let passes = passes.clone();
        tokio::spawn(async move {
            while let Some(next) = queue.get().await {
                passes.fetch_add(1, Ordering::SeqCst);
                handle_outcome(
                    &queue,
                    &next,
                    Ok(Action::RequeueAfter(Duration::from_millis(100))),
                );
                queue.done(&next);
            }
        })
    };

    queue.add(key("a"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    // A watch event mid-interval restarts the period rather than adding a chain
    queue.add(key("a"));
    tokio::time::sleep(Duration::from_millis(950)).await;
    queue.shutdown();
    worker.await.unwrap();

    let passes = passes.load(Ordering::SeqCst);
    assert!(passes >= 5, "only {passes} passes");
    assert!(passes <= 13, "{passes} passes in one second");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_key_never_processed_by_two_workers() {
    let queue = Arc::new(WorkQueue::default());
    let in_flight = Arc::new(Mutex::new(HashSet::new()));
    let processed = Arc::new(Mutex::new(Vec::new()));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            let in_flight = in_flight.clone();
            let processed = processed.clone();
            tokio::spawn(async move {
                while let Some(next) = queue.get().await {
                    assert!(
                        in_flight.lock().unwrap().insert(next.clone()),
                        "{next} handed out twice"
                    );
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.lock().unwrap().remove(&next);
                    processed.lock().unwrap().push(next.clone());
                    queue.done(&next);
                }
            })
        })
        .collect();

    for round in 0..20 {
        for name in ["a", "b", "c"] {
            queue.add(key(name));
        }
        if round % 5 == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while !queue.is_empty() || !in_flight.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue drained");
    queue.shutdown();
    for worker in workers {
        worker.await.unwrap();
    }

    let processed = processed.lock().unwrap();
    let distinct: HashSet<_> = processed.iter().cloned().collect();
    assert_eq!(distinct.len(), 3);
    // Duplicate adds coalesce, so far fewer passes than adds
    assert!(processed.len() < 60);
}

#[tokio::test]
async fn test_shutdown_drops_pending_keys() {
    let queue = WorkQueue::default();
    queue.add(key("a"));
    queue.add(key("b"));
    queue.shutdown();

    assert!(queue.is_shutting_down());
    assert_eq!(queue.get().await, None);

    queue.done(&key("a"));
    queue.add(key("c"));
    assert_eq!(queue.get().await, None);
}
