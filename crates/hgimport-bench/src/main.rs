//! hgimport-bench — drive a queued backing store with synthetic load.
//!
//! Usage: hgimport-bench [worker_threads]
//!
//! Seeds an in-memory backing store, fires mixed blob/tree requests from
//! several producer threads at rotating priorities, waits for every handle,
//! checks each payload against the id that was asked for, and prints the
//! queue stats as JSON.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use serde::Serialize;

use hgimport_core::config::{BenchConfig, ImportConfig};
use hgimport_core::{Blob, EntryKind, Hash, Tree, TreeEntry};
use hgimport_queue::{ImportPriority, MemoryBackingStore, QueueStats, QueuedBackingStore};

#[derive(Serialize)]
struct Report {
    requests: usize,
    elapsed_ms: u64,
    requests_per_sec: f64,
    blob_fetches: u64,
    tree_fetches: u64,
    queue: QueueStats,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = ImportConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = ImportConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        ImportConfig::default()
    });

    if let Some(arg) = std::env::args().nth(1) {
        config.queue.worker_threads = arg
            .parse()
            .with_context(|| format!("invalid worker count {arg:?}"))?;
    }
    tracing::info!(
        workers = config.queue.worker_threads,
        producers = config.bench.producers,
        per_producer = config.bench.requests_per_producer,
        "hgimport-bench starting"
    );

    let backing = seed(&config.bench);
    let queued = Arc::new(
        QueuedBackingStore::new(backing, &config.queue).context("failed to start import queue")?,
    );

    let start = Instant::now();
    let producers: Vec<_> = (0..config.bench.producers)
        .map(|p| {
            let queued = queued.clone();
            let bench = config.bench.clone();
            thread::Builder::new()
                .name(format!("producer-{p}"))
                .spawn(move || produce(p, &queued, &bench))
                .context("failed to spawn producer")
        })
        .collect::<Result<_>>()?;

    let mut requests = 0;
    for handle in producers {
        requests += match handle.join() {
            Ok(result) => result?,
            Err(_) => bail!("producer thread panicked"),
        };
    }
    let elapsed = start.elapsed();

    let report = Report {
        requests,
        elapsed_ms: elapsed.as_millis() as u64,
        requests_per_sec: requests as f64 / elapsed.as_secs_f64().max(f64::EPSILON),
        blob_fetches: queued.backing_store().blob_fetches(),
        tree_fetches: queued.backing_store().tree_fetches(),
        queue: queued.stats(),
    };
    queued.shutdown();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Object `n` of the synthetic repository: blob `n`, and tree `n` holding it.
fn blob_id(n: u64) -> Hash {
    Hash::of(format!("blob/{n}").as_bytes())
}

fn tree_id(n: u64) -> Hash {
    Hash::of(format!("tree/{n}").as_bytes())
}

fn seed(bench: &BenchConfig) -> MemoryBackingStore {
    let store = MemoryBackingStore::with_latency(Duration::from_millis(bench.fetch_latency_ms));
    for n in 0..bench.distinct_ids {
        let blob = Blob::new(blob_id(n), format!("contents of {n}\n").into_bytes());
        store.put_tree(Tree::new(
            tree_id(n),
            vec![TreeEntry {
                name: format!("file-{n}"),
                id: blob.id,
                kind: EntryKind::Regular,
            }],
        ));
        store.put_blob(blob);
    }
    tracing::info!(objects = bench.distinct_ids, "backing store seeded");
    store
}

/// Issue this producer's share of requests, then wait for and check them.
fn produce(
    producer: usize,
    queued: &QueuedBackingStore<MemoryBackingStore>,
    bench: &BenchConfig,
) -> Result<usize> {
    let space = bench.distinct_ids.max(1);
    let mut blobs = Vec::new();
    let mut trees = Vec::new();

    for i in 0..bench.requests_per_producer {
        let n = ((producer * bench.requests_per_producer + i) as u64 * 7919) % space;
        let priority = ImportPriority::ALL[i % ImportPriority::ALL.len()];
        if i % 2 == 0 {
            blobs.push((n, queued.get_blob(&blob_id(n), priority)?));
        } else {
            trees.push((n, queued.get_tree(&tree_id(n), priority)?));
        }
    }

    for (n, handle) in &blobs {
        let blob = handle.wait_blocking()?;
        if blob.id != blob_id(*n) {
            bail!("blob {n}: got payload for {}", blob.id);
        }
    }
    for (n, handle) in &trees {
        let tree = handle.wait_blocking()?;
        if tree.id != tree_id(*n) || tree.get(&format!("file-{n}")).is_none() {
            bail!("tree {n}: got payload for {}", tree.id);
        }
    }

    tracing::debug!(producer, requests = bench.requests_per_producer, "producer done");
    Ok(blobs.len() + trees.len())
}
