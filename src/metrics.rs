//! Process counters.
//!
//! A small in-process collector mirroring the worker's lifecycle:
//! accepted, acknowledged, rejected-by-reason, sent, and the two error
//! classes, plus an end-to-end latency accumulator. Rendered on demand in
//! Prometheus text exposition format by the liveness server.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Counter collector shared by the worker and the liveness server.
pub struct Collector {
    group_id: String,
    topic: String,

    accepted: AtomicU64,
    acknowledged: AtomicU64,
    receive_errors: AtomicU64,
    sent: AtomicU64,
    send_errors: AtomicU64,
    rejected: Mutex<BTreeMap<&'static str, u64>>,

    latency_micros_sum: AtomicU64,
    latency_count: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub accepted: u64,
    pub acknowledged: u64,
    pub receive_errors: u64,
    pub sent: u64,
    pub send_errors: u64,
    pub rejected: Vec<(&'static str, u64)>,
    pub latency_count: u64,
}

impl Collector {
    pub fn new(group_id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            topic: topic.into(),
            accepted: AtomicU64::new(0),
            acknowledged: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            rejected: Mutex::new(BTreeMap::new()),
            latency_micros_sum: AtomicU64::new(0),
            latency_count: AtomicU64::new(0),
        }
    }

    pub fn inc_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_acknowledged(&self) {
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_receive_errors(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_send_errors(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self, reason: &'static str) {
        *self.rejected.lock().unwrap().entry(reason).or_insert(0) += 1;
    }

    pub fn observe_latency(&self, latency: Duration) {
        self.latency_micros_sum
            .fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            rejected: self
                .rejected
                .lock()
                .unwrap()
                .iter()
                .map(|(reason, count)| (*reason, *count))
                .collect(),
            latency_count: self.latency_count.load(Ordering::Relaxed),
        }
    }

    /// Render every counter in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let labels = format!(
            "kafka_group_id=\"{}\",kafka_topic=\"{}\"",
            self.group_id, self.topic
        );

        let mut out = String::new();
        let mut counter = |name: &str, help: &str, value: u64| {
            let _ = writeln!(out, "# HELP {name} {help}");
            let _ = writeln!(out, "# TYPE {name} counter");
            let _ = writeln!(out, "{name}{{{labels}}} {value}");
        };

        counter(
            "courier_content_accepted",
            "content objects fetched from the queue",
            self.accepted.load(Ordering::Relaxed),
        );
        counter(
            "courier_content_acknowledged",
            "content objects committed back to the queue",
            self.acknowledged.load(Ordering::Relaxed),
        );
        counter(
            "courier_content_receive_errors",
            "errors getting content from the queue",
            self.receive_errors.load(Ordering::Relaxed),
        );
        counter(
            "courier_content_sent",
            "content sent successfully",
            self.sent.load(Ordering::Relaxed),
        );
        counter(
            "courier_content_send_errors",
            "content objects with error on convert or send",
            self.send_errors.load(Ordering::Relaxed),
        );

        let _ = writeln!(
            out,
            "# HELP courier_content_rejected content objects rejected from the queue"
        );
        let _ = writeln!(out, "# TYPE courier_content_rejected counter");
        for (reason, count) in self.rejected.lock().unwrap().iter() {
            let _ = writeln!(
                out,
                "courier_content_rejected{{{labels},reason=\"{reason}\"}} {count}"
            );
        }

        let sum_seconds =
            self.latency_micros_sum.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        let _ = writeln!(
            out,
            "# HELP courier_content_processing_latency_seconds receive-to-commit latency"
        );
        let _ = writeln!(out, "# TYPE courier_content_processing_latency_seconds summary");
        let _ = writeln!(
            out,
            "courier_content_processing_latency_seconds_sum{{{labels}}} {sum_seconds}"
        );
        let _ = writeln!(
            out,
            "courier_content_processing_latency_seconds_count{{{labels}}} {}",
            self.latency_count.load(Ordering::Relaxed)
        );

        out
    }
}
