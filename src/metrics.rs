//! Counters for the request → fulfillment → mint cycle.
//!
//! All counters are backed by atomics for lock-free concurrent access.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregated cycle metrics, shareable via `Arc<CycleMetrics>`.
#[derive(Default)]
pub struct CycleMetrics {
    /// Randomness requests accepted by the ledger.
    pub requests_submitted: AtomicU64,
    /// Requests rejected at submission.
    pub requests_rejected: AtomicU64,
    /// Waits that observed a positive result.
    pub fulfillments_observed: AtomicU64,
    /// Waits that hit their deadline.
    pub wait_timeouts: AtomicU64,
    /// Rewards minted.
    pub rewards_minted: AtomicU64,
    /// Sum of request-to-fulfillment latencies in milliseconds.
    pub fulfillment_latency_sum_ms: AtomicU64,
}

impl CycleMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an observed fulfillment with its latency.
    pub fn record_fulfillment(&self, latency_ms: u64) {
        self.fulfillments_observed.fetch_add(1, Ordering::Relaxed);
        self.fulfillment_latency_sum_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.wait_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mint(&self) {
        self.rewards_minted.fetch_add(1, Ordering::Relaxed);
    }

    /// Average fulfillment latency in milliseconds, or 0 if none.
    pub fn avg_latency_ms(&self) -> u64 {
        let count = self.fulfillments_observed.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        self.fulfillment_latency_sum_ms.load(Ordering::Relaxed) / count
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "requests_submitted": self.requests_submitted.load(Ordering::Relaxed),
            "requests_rejected": self.requests_rejected.load(Ordering::Relaxed),
            "fulfillments_observed": self.fulfillments_observed.load(Ordering::Relaxed),
            "wait_timeouts": self.wait_timeouts.load(Ordering::Relaxed),
            "rewards_minted": self.rewards_minted.load(Ordering::Relaxed),
            "avg_fulfillment_latency_ms": self.avg_latency_ms(),
        })
    }
}
