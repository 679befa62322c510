//! Metrics Collection
//!
//! Counters shared by the DNS server, the pollers and the sweep task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics collector for the DNS Seed
#[derive(Default)]
pub struct Metrics {
    /// Start time for uptime calculation
    start_time: Option<Instant>,

    /// Packets received on either transport
    pub dns_queries: AtomicU64,

    /// Responses sent
    pub dns_responses: AtomicU64,

    /// Malformed packets dropped without a response
    pub dns_dropped: AtomicU64,

    /// Name-error responses
    pub dns_nxdomain: AtomicU64,

    /// Not-implemented responses
    pub dns_notimp: AtomicU64,

    /// Responses cut to fit the UDP budget
    pub dns_truncated: AtomicU64,

    /// Completed poll cycles
    pub poll_cycles: AtomicU64,

    /// Poll cycles aborted by an upstream error
    pub poll_failures: AtomicU64,

    /// Node records written by pollers
    pub nodes_upserted: AtomicU64,

    /// Node records removed by the sweep
    pub nodes_evicted: AtomicU64,

    /// Fresh nodes across all realms, as of the last sweep
    pub fresh_nodes: AtomicU64,
}

impl Metrics {
    /// Create new metrics collector
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

    pub fn inc_dns_responses(&self) {
        self.dns_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dns_dropped(&self) {
        self.dns_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dns_nxdomain(&self) {
        self.dns_nxdomain.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dns_notimp(&self) {
        self.dns_notimp.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dns_truncated(&self) {
        self.dns_truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_poll_cycles(&self) {
        self.poll_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_poll_failures(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_nodes_upserted(&self, count: u64) {
        self.nodes_upserted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_nodes_evicted(&self, count: u64) {
        self.nodes_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_fresh_nodes(&self, count: u64) {
        self.fresh_nodes.store(count, Ordering::Relaxed);
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!(
            "# HELP lightning_dns_seed_uptime_seconds DNS Seed uptime in seconds\n\
             # TYPE lightning_dns_seed_uptime_seconds gauge\n\
             lightning_dns_seed_uptime_seconds {}\n\n",
            self.uptime_secs()
        ));

        let counters = [
            ("dns_queries_total", "DNS packets received", &self.dns_queries),
            ("dns_responses_total", "DNS responses sent", &self.dns_responses),
            ("dns_dropped_total", "Malformed DNS packets dropped", &self.dns_dropped),
            ("dns_nxdomain_total", "Name-error responses", &self.dns_nxdomain),
            ("dns_notimp_total", "Not-implemented responses", &self.dns_notimp),
            ("dns_truncated_total", "Truncated UDP responses", &self.dns_truncated),
            ("poll_cycles_total", "Completed lightningd poll cycles", &self.poll_cycles),
            ("poll_failures_total", "Failed lightningd poll cycles", &self.poll_failures),
            ("nodes_upserted_total", "Node records written by pollers", &self.nodes_upserted),
            ("nodes_evicted_total", "Stale node records evicted", &self.nodes_evicted),
        ];

        for (name, help, value) in counters {
            output.push_str(&format!(
                "# HELP lightning_dns_seed_{name} {help}\n\
                 # TYPE lightning_dns_seed_{name} counter\n\
                 lightning_dns_seed_{name} {}\n\n",
                value.load(Ordering::Relaxed)
            ));
        }

        output.push_str(&format!(
            "# HELP lightning_dns_seed_fresh_nodes Fresh nodes across all realms\n\
             # TYPE lightning_dns_seed_fresh_nodes gauge\n\
             lightning_dns_seed_fresh_nodes {}\n\n",
            self.fresh_nodes.load(Ordering::Relaxed)
        ));

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uptime_secs": self.uptime_secs(),
            "dns": {
                "queries": self.dns_queries.load(Ordering::Relaxed),
                "responses": self.dns_responses.load(Ordering::Relaxed),
                "dropped": self.dns_dropped.load(Ordering::Relaxed),
                "nxdomain": self.dns_nxdomain.load(Ordering::Relaxed),
                "notimp": self.dns_notimp.load(Ordering::Relaxed),
                "truncated": self.dns_truncated.load(Ordering::Relaxed),
            },
            "poller": {
                "cycles": self.poll_cycles.load(Ordering::Relaxed),
                "failures": self.poll_failures.load(Ordering::Relaxed),
                "nodes_upserted": self.nodes_upserted.load(Ordering::Relaxed),
            },
            "view": {
                "nodes_evicted": self.nodes_evicted.load(Ordering::Relaxed),
                "fresh_nodes": self.fresh_nodes.load(Ordering::Relaxed),
            },
        })
    }
}
