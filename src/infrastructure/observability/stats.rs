//! Cache statistics collector
//!
//! Pure side-channel instrumentation: never influences cache behavior, and
//! safe to call from many request handlers concurrently. Counters are atomic;
//! the namespace map takes a read lock on the hot path and a write lock only
//! the first time a namespace appears.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use metrics::{counter, histogram};
use serde::Serialize;

#[derive(Debug, Default)]
struct NamespaceCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    latency_total_micros: AtomicU64,
    latency_samples: AtomicU64,
}

/// Aggregated per-namespace statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct NamespaceStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub avg_latency_ms: f64,
}

/// Point-in-time view of the collector.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsSnapshot {
    pub namespaces: BTreeMap<String, NamespaceStats>,
    pub overall_hit_rate: f64,
}

/// Hit/miss/latency aggregation keyed by cache namespace.
#[derive(Debug, Default)]
pub struct StatsCollector {
    namespaces: RwLock<HashMap<String, Arc<NamespaceCounters>>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, namespace: &str) -> Arc<NamespaceCounters> {
        {
            let map = self.namespaces.read().unwrap_or_else(|e| e.into_inner());
            if let Some(counters) = map.get(namespace) {
                return Arc::clone(counters);
            }
        }

        let mut map = self.namespaces.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            map.entry(namespace.to_string())
                .or_insert_with(|| Arc::new(NamespaceCounters::default())),
        )
    }

    pub fn record_hit(&self, namespace: &str) {
        self.counters(namespace).hits.fetch_add(1, Ordering::Relaxed);
        counter!("tiercache_hits_total", "namespace" => namespace.to_string()).increment(1);
    }

    pub fn record_miss(&self, namespace: &str) {
        self.counters(namespace).misses.fetch_add(1, Ordering::Relaxed);
        counter!("tiercache_misses_total", "namespace" => namespace.to_string()).increment(1);
    }

    pub fn record_latency(&self, namespace: &str, duration: Duration) {
        let counters = self.counters(namespace);
        counters
            .latency_total_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        counters.latency_samples.fetch_add(1, Ordering::Relaxed);
        histogram!("tiercache_op_duration_seconds", "namespace" => namespace.to_string())
            .record(duration.as_secs_f64());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let map = self.namespaces.read().unwrap_or_else(|e| e.into_inner());

        let mut namespaces = BTreeMap::new();
        let mut total_hits = 0u64;
        let mut total_misses = 0u64;

        for (name, counters) in map.iter() {
            let hits = counters.hits.load(Ordering::Relaxed);
            let misses = counters.misses.load(Ordering::Relaxed);
            let samples = counters.latency_samples.load(Ordering::Relaxed);
            let total_micros = counters.latency_total_micros.load(Ordering::Relaxed);

            total_hits += hits;
            total_misses += misses;

            namespaces.insert(
                name.clone(),
                NamespaceStats {
                    hits,
                    misses,
                    hit_rate: ratio(hits, hits + misses),
                    avg_latency_ms: if samples == 0 {
                        0.0
                    } else {
                        total_micros as f64 / samples as f64 / 1000.0
                    },
                },
            );
        }

        StatsSnapshot {
            namespaces,
            overall_hit_rate: ratio(total_hits, total_hits + total_misses),
        }
    }
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
