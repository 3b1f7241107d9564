use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hgimport_core::Hash;
use hgimport_queue::{ImportPriority, QueuedBackingStore};

use crate::*;

const PRODUCERS: u64 = 8;
const PER_PRODUCER: u64 = 250;
const WORKERS: usize = 4;

fn id_for(producer: u64, i: u64) -> Hash {
    Hash::from_u64(producer * 1_000_000 + i)
}

/// M producers × K requests against W workers. Every handle must resolve to
/// the payload for its own id.
fn run_stress(dedupe: bool) -> Arc<QueuedBackingStore<EchoStore>> {
    let queued = Arc::new(
        QueuedBackingStore::new(
            EchoStore::with_latency(Duration::from_micros(50)),
            &queue_config(WORKERS, dedupe),
        )
        .unwrap(),
    );

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queued = queued.clone();
            thread::spawn(move || {
                let handles: Vec<_> = (0..PER_PRODUCER)
                    .map(|i| {
                        let id = id_for(p, i);
                        let priority = ImportPriority::ALL[(i % 3) as usize];
                        (id, queued.get_blob(&id, priority).unwrap())
                    })
                    .collect();
                for (id, handle) in handles {
                    let blob = handle.wait_blocking().unwrap();
                    assert_eq!(blob.id, id);
                    assert_eq!(blob.contents, id.to_hex().into_bytes());
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }
    queued
}

#[test]
fn test_every_request_completes_exactly_once() {
    let queued = run_stress(false);
    let total = PRODUCERS * PER_PRODUCER;

    let stats = queued.stats();
    assert_eq!(stats.enqueued, total);
    assert_eq!(stats.completed, total);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.pending, 0);
    assert_eq!(
        queued.backing_store().blob_calls.load(Ordering::SeqCst) as u64,
        total
    );

    // No id was fetched twice and none was skipped.
    let fetched: HashSet<_> = queued
        .backing_store()
        .fetch_order()
        .into_iter()
        .map(|(_, id)| id)
        .collect();
    assert_eq!(fetched.len() as u64, total);
}

#[test]
fn test_stress_with_dedupe_on_distinct_ids() {
    let queued = run_stress(true);
    let stats = queued.stats();
    assert_eq!(stats.enqueued, PRODUCERS * PER_PRODUCER);
    assert_eq!(stats.deduplicated, 0);
    assert_eq!(stats.in_flight, 0);
}

#[test]
fn test_hot_ids_are_fetched_once_per_wave() {
    let queued = Arc::new(
        QueuedBackingStore::new(EchoStore::gated(), &queue_config(WORKERS, true)).unwrap(),
    );
    let hot: Vec<Hash> = (0..4).map(|n| Hash::from_u64(500 + n)).collect();

    // Every producer asks for the same hot set while the gate is closed.
    let producers: Vec<_> = (0..PRODUCERS)
        .map(|_| {
            let queued = queued.clone();
            let hot = hot.clone();
            thread::spawn(move || {
                hot.iter()
                    .map(|id| (*id, queued.get_tree(id, ImportPriority::Normal).unwrap()))
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let handles: Vec<_> = producers
        .into_iter()
        .flat_map(|p| p.join().unwrap())
        .collect();

    queued.backing_store().open_gate();
    for (id, handle) in &handles {
        assert_eq!(handle.wait_blocking().unwrap().id, *id);
    }

    assert_eq!(queued.backing_store().tree_calls.load(Ordering::SeqCst), hot.len());
    let stats = queued.stats();
    assert_eq!(stats.enqueued, hot.len() as u64);
    assert_eq!(stats.deduplicated, PRODUCERS * hot.len() as u64 - hot.len() as u64);
}
