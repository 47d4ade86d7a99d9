//! Thread-safe metrics collection system
//!
//! Atomic counters for the hot paths, mutex-protected maps for the per-label
//! breakdowns. The snapshot is served as JSON at `/metrics`.

use crate::document::Format;
use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

const MAX_TIMING_SAMPLES: usize = 1000;

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    documents_received: AtomicU64,
    documents_in_flight: AtomicU64,
    documents_processed: AtomicU64,
    documents_failed: AtomicU64,
    documents_unsupported: AtomicU64,

    actions_delivered: AtomicU64,
    actions_failed: AtomicU64,
    actions_rejected: AtomicU64,
    delivery_retries: AtomicU64,

    processing_times: Mutex<Vec<u64>>, // in milliseconds
    formats: Mutex<BTreeMap<String, u64>>,
    intent_tiers: Mutex<BTreeMap<String, u64>>,
    actions: Mutex<BTreeMap<String, ActionStats>>,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            documents_received: AtomicU64::new(0),
            documents_in_flight: AtomicU64::new(0),
            documents_processed: AtomicU64::new(0),
            documents_failed: AtomicU64::new(0),
            documents_unsupported: AtomicU64::new(0),
            actions_delivered: AtomicU64::new(0),
            actions_failed: AtomicU64::new(0),
            actions_rejected: AtomicU64::new(0),
            delivery_retries: AtomicU64::new(0),
            processing_times: Mutex::new(Vec::new()),
            formats: Mutex::new(BTreeMap::new()),
            intent_tiers: Mutex::new(BTreeMap::new()),
            actions: Mutex::new(BTreeMap::new()),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Document metrics
    pub fn document_received(&self) {
        self.documents_received.fetch_add(1, Ordering::Relaxed);
        self.documents_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn document_processed(&self, format: Format, duration: Duration) {
        self.documents_processed.fetch_add(1, Ordering::Relaxed);
        self.finish_document(duration);
        if let Ok(mut formats) = self.formats.lock() {
            *formats.entry(format.as_str().to_string()).or_insert(0) += 1;
        }
    }

    pub fn document_failed(&self, duration: Duration) {
        self.documents_failed.fetch_add(1, Ordering::Relaxed);
        self.finish_document(duration);
    }

    pub fn document_unsupported(&self, duration: Duration) {
        self.documents_unsupported.fetch_add(1, Ordering::Relaxed);
        self.finish_document(duration);
    }

    fn finish_document(&self, duration: Duration) {
        // Saturate at zero if a test reset raced with an in-flight document
        let _ = self
            .documents_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
        self.record_processing_time(duration);
    }

    fn record_processing_time(&self, duration: Duration) {
        if let Ok(mut times) = self.processing_times.lock() {
            times.push(duration.as_millis() as u64);
            if times.len() > MAX_TIMING_SAMPLES {
                times.remove(0);
            }
        }
    }

    // Classification metrics
    pub fn intent_decided(&self, tier: &str) {
        if let Ok(mut tiers) = self.intent_tiers.lock() {
            *tiers.entry(tier.to_string()).or_insert(0) += 1;
        }
    }

    // Action delivery metrics
    pub fn action_delivered(&self, action: &str, attempts: u32) {
        self.actions_delivered.fetch_add(1, Ordering::Relaxed);
        self.record_retries(attempts);
        self.update_action(action, |stats| stats.delivered += 1);
    }

    pub fn action_failed(&self, action: &str, attempts: u32) {
        self.actions_failed.fetch_add(1, Ordering::Relaxed);
        self.record_retries(attempts);
        self.update_action(action, |stats| stats.failed += 1);
    }

    /// Action name had no endpoint; nothing was sent
    pub fn action_rejected(&self, action: &str) {
        self.actions_rejected.fetch_add(1, Ordering::Relaxed);
        self.update_action(action, |stats| stats.rejected += 1);
    }

    fn record_retries(&self, attempts: u32) {
        self.delivery_retries
            .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);
    }

    fn update_action(&self, action: &str, update: impl FnOnce(&mut ActionStats)) {
        if let Ok(mut actions) = self.actions.lock() {
            update(actions.entry(action.to_string()).or_default());
        }
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.documents_received,
            &self.documents_in_flight,
            &self.documents_processed,
            &self.documents_failed,
            &self.documents_unsupported,
            &self.actions_delivered,
            &self.actions_failed,
            &self.actions_rejected,
            &self.delivery_retries,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        if let Ok(mut times) = self.processing_times.lock() {
            times.clear();
        }
        if let Ok(mut formats) = self.formats.lock() {
            formats.clear();
        }
        if let Ok(mut tiers) = self.intent_tiers.lock() {
            tiers.clear();
        }
        if let Ok(mut actions) = self.actions.lock() {
            actions.clear();
        }
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Calculate processing time statistics: (avg, p50, p95, p99)
    fn processing_time_statistics(&self) -> (f64, f64, f64, f64) {
        let Ok(times) = self.processing_times.lock() else {
            return (0.0, 0.0, 0.0, 0.0);
        };
        if times.is_empty() {
            return (0.0, 0.0, 0.0, 0.0);
        }

        let mut sorted_times = times.clone();
        drop(times);
        sorted_times.sort_unstable();

        let avg = sorted_times.iter().sum::<u64>() as f64 / sorted_times.len() as f64;
        (
            avg,
            percentile(&sorted_times, 50.0),
            percentile(&sorted_times, 95.0),
            percentile(&sorted_times, 99.0),
        )
    }

    /// Get complete metrics snapshot
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let (avg_processing_time_ms, p50, p95, p99) = self.processing_time_statistics();

        MetricsSnapshot {
            documents: DocumentMetrics {
                received: self.documents_received.load(Ordering::Relaxed),
                in_flight: self.documents_in_flight.load(Ordering::Relaxed),
                processed: self.documents_processed.load(Ordering::Relaxed),
                failed: self.documents_failed.load(Ordering::Relaxed),
                unsupported: self.documents_unsupported.load(Ordering::Relaxed),
                by_format: self
                    .formats
                    .lock()
                    .map(|m| m.clone())
                    .unwrap_or_default(),
                avg_processing_time_ms,
                processing_time_p50_ms: p50,
                processing_time_p95_ms: p95,
                processing_time_p99_ms: p99,
            },
            intents: IntentMetrics {
                by_tier: self
                    .intent_tiers
                    .lock()
                    .map(|m| m.clone())
                    .unwrap_or_default(),
            },
            actions: ActionMetrics {
                delivered: self.actions_delivered.load(Ordering::Relaxed),
                failed: self.actions_failed.load(Ordering::Relaxed),
                rejected: self.actions_rejected.load(Ordering::Relaxed),
                retries: self.delivery_retries.load(Ordering::Relaxed),
                by_action: self
                    .actions
                    .lock()
                    .map(|m| m.clone())
                    .unwrap_or_default(),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActionStats {
    pub delivered: u64,
    pub failed: u64,
    pub rejected: u64,
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub documents: DocumentMetrics,
    pub intents: IntentMetrics,
    pub actions: ActionMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Serialize)]
pub struct DocumentMetrics {
    pub received: u64,
    pub in_flight: u64,
    pub processed: u64,
    pub failed: u64,
    pub unsupported: u64,
    pub by_format: BTreeMap<String, u64>,
    pub avg_processing_time_ms: f64,
    pub processing_time_p50_ms: f64,
    pub processing_time_p95_ms: f64,
    pub processing_time_p99_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct IntentMetrics {
    /// Decisions per strategy tier ("schema", "llm", "keyword", "none")
    pub by_tier: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize)]
pub struct ActionMetrics {
    pub delivered: u64,
    pub failed: u64,
    pub rejected: u64,
    /// Attempts beyond the first, summed over all deliveries
    pub retries: u64,
    pub by_action: BTreeMap<String, ActionStats>,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn percentile(sorted_data: &[u64], percentile: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let len = sorted_data.len();
    let index = (percentile / 100.0) * (len - 1) as f64;

    if index.fract() == 0.0 {
        sorted_data[index as usize] as f64
    } else {
        let lower_value = sorted_data[index.floor() as usize] as f64;
        let upper_value = sorted_data[index.ceil() as usize] as f64;
        lower_value + (upper_value - lower_value) * index.fract()
    }
}
