//! Log-bucketed latency histogram.
//!
//! Bucket `i` holds latencies in `(γ^(i-1), γ^i]` microseconds and reports
//! the value `2γ^i / (γ + 1)`, which is within `(γ-1)/(γ+1)` (≈2%) of
//! every latency in the bucket. Recording is a single relaxed
//! `fetch_add`, so many request threads can write without contention
//! beyond the cache line of the bucket they hit.

use std::sync::atomic::{AtomicU64, Ordering};

/// Growth factor between bucket bounds.
const GAMMA: f64 = 1.04;
/// γ^479 µs ≈ 145 s; anything slower lands in the last bucket.
const BUCKETS: usize = 480;

pub struct LatencyHistogram {
    buckets: Box<[AtomicU64]>,
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKETS).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Record one latency in milliseconds. Non-finite and negative values count as zero.
    pub fn record(&self, latency_ms: f64) {
        self.buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
    }

    /// Total recorded samples.
    pub fn count(&self) -> u64 {
        self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).sum()
    }

    /// Estimated `q`-quantile (0.0–1.0) in milliseconds; 0.0 when empty.
    pub fn quantile(&self, q: f64) -> f64 {
        let counts: Vec<u64> = self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        quantile_of(&counts, q)
    }

    /// p50, p95, p99 from one consistent read of the buckets.
    pub fn percentiles(&self) -> (f64, f64, f64) {
        let counts: Vec<u64> = self.buckets.iter().map(|b| b.load(Ordering::Relaxed)).collect();
        (
            quantile_of(&counts, 0.50),
            quantile_of(&counts, 0.95),
            quantile_of(&counts, 0.99),
        )
    }
}

fn bucket_index(latency_ms: f64) -> usize {
    let micros = latency_ms * 1000.0;
    if !micros.is_finite() || micros <= 1.0 {
        return 0;
    }
    let idx = (micros.ln() / GAMMA.ln()).ceil() as usize;
    idx.min(BUCKETS - 1)
}

fn bucket_value_ms(index: usize) -> f64 {
    2.0 * GAMMA.powi(index as i32) / (GAMMA + 1.0) / 1000.0
}

fn quantile_of(counts: &[u64], q: f64) -> f64 {
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let rank = ((q.clamp(0.0, 1.0) * total as f64).ceil() as u64).max(1);
    let mut seen = 0u64;
    for (i, &c) in counts.iter().enumerate() {
        seen += c;
        if seen >= rank {
            return bucket_value_ms(i);
        }
    }
    bucket_value_ms(counts.len() - 1)
}
