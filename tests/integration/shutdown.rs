use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hgimport_core::{FetchError, Hash};
use hgimport_queue::{ImportPriority, ImportRequest, ImportRequestQueue, QueuedBackingStore};

use crate::*;

/// Open the gate once the store has stopped taking requests, so in-flight
/// fetches finish while shutdown is joining. `pending` must name a tree that
/// is already queued: until the stop lands, asking again just coalesces.
fn release_after_stop(queued: &QueuedBackingStore<EchoStore>, pending: Hash) {
    wait_until("queue to stop", || {
        queued.get_tree(&pending, ImportPriority::Low).is_err()
    });
    queued.backing_store().open_gate();
}

#[test]
fn test_stop_wakes_every_blocked_dequeue() {
    let queue = Arc::new(ImportRequestQueue::new());
    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || {
                let start = Instant::now();
                let got = queue.dequeue();
                (got.is_none(), start.elapsed())
            })
        })
        .collect();

    thread::sleep(Duration::from_millis(50));
    queue.stop();

    for w in waiters {
        let (empty, waited) = w.join().unwrap();
        assert!(empty, "dequeue must return nothing after stop");
        assert!(waited < Duration::from_secs(5));
    }
}

#[test]
fn test_stop_returns_none_even_with_requests_queued() {
    let queue = ImportRequestQueue::new();
    let (request, handle) = ImportRequest::blob(Hash::from_u64(1), ImportPriority::High);
    queue.enqueue(request).unwrap();

    queue.stop();
    assert!(queue.dequeue().is_none());
    assert_eq!(queue.len(), 1);
    assert!(handle.try_result().is_none());

    drop(queue);
    assert_eq!(handle.wait_blocking().unwrap_err(), FetchError::Abandoned);
}

#[test]
fn test_shutdown_with_pending_requests_completes() {
    let queued = QueuedBackingStore::new(EchoStore::gated(), &queue_config(2, true)).unwrap();

    let running: Vec<_> = (0..2)
        .map(|n| queued.get_blob(&Hash::from_u64(n), ImportPriority::Normal).unwrap())
        .collect();
    wait_until("both workers to be busy", || {
        queued.backing_store().entered.load(Ordering::SeqCst) == 2
    });
    let stranded: Vec<_> = (10..20)
        .map(|n| queued.get_tree(&Hash::from_u64(n), ImportPriority::Low).unwrap())
        .collect();
    assert_eq!(queued.stats().pending, 10);

    let start = Instant::now();
    thread::scope(|s| {
        s.spawn(|| release_after_stop(&queued, Hash::from_u64(10)));
        queued.shutdown();
    });
    assert!(start.elapsed() < Duration::from_secs(5));

    for h in &running {
        assert!(h.wait_blocking().is_ok());
    }
    for h in &stranded {
        assert!(h.try_result().is_none());
    }
    assert_eq!(queued.backing_store().tree_calls.load(Ordering::SeqCst), 0);

    // Stopped pool, stranded requests still resident: commit lookups work.
    assert_eq!(queued.stats().pending, 10);
    let commit = Hash::from_u64(7000);
    assert_eq!(queued.get_tree_for_commit(&commit).wait_blocking().unwrap().id, commit);
    let manifest = Hash::from_u64(7001);
    let by_manifest = queued.get_tree_for_manifest(&commit, &manifest);
    assert_eq!(by_manifest.wait_blocking().unwrap().id, manifest);

    drop(queued);
    for h in &stranded {
        assert_eq!(h.wait_blocking().unwrap_err(), FetchError::Abandoned);
    }
    for h in &running {
        assert!(h.wait_blocking().is_ok(), "fulfilled handles outlive the store");
    }
}

#[test]
fn test_shutdown_is_idempotent_and_drop_after_is_clean() {
    let queued = QueuedBackingStore::new(EchoStore::new(), &queue_config(3, false)).unwrap();
    let handle = queued.get_blob(&Hash::from_u64(5), ImportPriority::Normal).unwrap();
    handle.wait_blocking().unwrap();

    queued.shutdown();
    queued.shutdown();
    assert_eq!(
        queued.get_blob(&Hash::from_u64(6), ImportPriority::High).unwrap_err(),
        FetchError::QueueClosed
    );
    assert_eq!(queued.stats().rejected, 1);
    drop(queued);

    assert_eq!(handle.wait_blocking().unwrap().id, Hash::from_u64(5));
}

#[tokio::test]
async fn test_async_waiter_sees_abandoned_on_drop() {
    let queued = QueuedBackingStore::new(EchoStore::gated(), &queue_config(1, true)).unwrap();
    let busy = queued.get_blob(&Hash::from_u64(0), ImportPriority::High).unwrap();
    wait_until("worker to be busy", || {
        queued.backing_store().entered.load(Ordering::SeqCst) == 1
    });
    let stranded = queued.get_tree(&Hash::from_u64(1), ImportPriority::Low).unwrap();

    let waiter = tokio::spawn({
        let h = stranded.clone();
        async move { h.wait().await }
    });

    tokio::task::spawn_blocking(move || {
        thread::scope(|s| {
            s.spawn(|| release_after_stop(&queued, Hash::from_u64(1)));
            queued.shutdown();
        });
        drop(queued);
    })
    .await
    .unwrap();

    assert!(busy.wait().await.is_ok());
    assert_eq!(waiter.await.unwrap().unwrap_err(), FetchError::Abandoned);
}
