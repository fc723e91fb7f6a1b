//! Metrics Collection
//!
//! Counters for the stub DNS server and the control-plane endpoints,
//! exported in Prometheus and JSON formats.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector shared across the DNS server and HTTP API
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// Total DNS queries received
    pub dns_queries: AtomicU64,

    /// Queries answered locally (directory/static)
    pub dns_answered: AtomicU64,

    /// Queries relayed from an upstream resolver
    pub dns_forwarded: AtomicU64,

    /// Queries answered NXDOMAIN
    pub dns_negative: AtomicU64,

    /// Queries that failed (exhausted upstreams, malformed packets)
    pub dns_failed: AtomicU64,

    /// Directory snapshots applied
    pub directory_updates: AtomicU64,

    /// Directory snapshots rejected as stale
    pub directory_stale_rejected: AtomicU64,

    /// Policy updates applied
    pub policy_updates: AtomicU64,

    /// Policy updates rejected as invalid
    pub policy_rejected: AtomicU64,

    /// Nodes in the current directory snapshot
    pub directory_nodes: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    pub fn inc_dns_queries(&self) {
        self.dns_queries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dns_answered(&self) {
        self.dns_answered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dns_forwarded(&self) {
        self.dns_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dns_negative(&self) {
        self.dns_negative.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dns_failed(&self) {
        self.dns_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_directory_updates(&self) {
        self.directory_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_directory_stale_rejected(&self) {
        self.directory_stale_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_policy_updates(&self) {
        self.policy_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_policy_rejected(&self) {
        self.policy_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_directory_nodes(&self, count: u64) {
        self.directory_nodes.store(count, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let counters = [
            (
                "meshdns_uptime_seconds",
                "gauge",
                "Service uptime in seconds",
                self.uptime_secs(),
            ),
            (
                "meshdns_dns_queries_total",
                "counter",
                "Total DNS queries received",
                self.dns_queries.load(Ordering::Relaxed),
            ),
            (
                "meshdns_dns_answered_total",
                "counter",
                "Queries answered locally",
                self.dns_answered.load(Ordering::Relaxed),
            ),
            (
                "meshdns_dns_forwarded_total",
                "counter",
                "Queries relayed from upstream",
                self.dns_forwarded.load(Ordering::Relaxed),
            ),
            (
                "meshdns_dns_negative_total",
                "counter",
                "Queries answered NXDOMAIN",
                self.dns_negative.load(Ordering::Relaxed),
            ),
            (
                "meshdns_dns_failed_total",
                "counter",
                "Queries that failed",
                self.dns_failed.load(Ordering::Relaxed),
            ),
            (
                "meshdns_directory_updates_total",
                "counter",
                "Directory snapshots applied",
                self.directory_updates.load(Ordering::Relaxed),
            ),
            (
                "meshdns_directory_stale_rejected_total",
                "counter",
                "Directory snapshots rejected as stale",
                self.directory_stale_rejected.load(Ordering::Relaxed),
            ),
            (
                "meshdns_policy_updates_total",
                "counter",
                "Policy updates applied",
                self.policy_updates.load(Ordering::Relaxed),
            ),
            (
                "meshdns_policy_rejected_total",
                "counter",
                "Policy updates rejected as invalid",
                self.policy_rejected.load(Ordering::Relaxed),
            ),
            (
                "meshdns_directory_nodes",
                "gauge",
                "Nodes in the current directory snapshot",
                self.directory_nodes.load(Ordering::Relaxed),
            ),
        ];

        let mut output = String::new();
        for (name, kind, help, value) in counters {
            output.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} {kind}\n{name} {value}\n\n"
            ));
        }
        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "dns": {
                "queries": self.dns_queries.load(Ordering::Relaxed),
                "answered": self.dns_answered.load(Ordering::Relaxed),
                "forwarded": self.dns_forwarded.load(Ordering::Relaxed),
                "negative": self.dns_negative.load(Ordering::Relaxed),
                "failed": self.dns_failed.load(Ordering::Relaxed),
            },
            "directory": {
                "updates": self.directory_updates.load(Ordering::Relaxed),
                "stale_rejected": self.directory_stale_rejected.load(Ordering::Relaxed),
                "nodes": self.directory_nodes.load(Ordering::Relaxed),
            },
            "policy": {
                "updates": self.policy_updates.load(Ordering::Relaxed),
                "rejected": self.policy_rejected.load(Ordering::Relaxed),
            },
        })
    }
}
