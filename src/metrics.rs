//! Prometheus metrics for data store introspection
//!
//! Features:
//! - Entry metrics (allocated, used, dead)
//! - Buffer metrics per lifecycle state
//! - Generation and reclamation progress
//! - Compaction counters for the memory-pressure policy

use crate::datastore::CapacityStats;
use prometheus::{Encoder, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder};
use tracing::{error, info};

lazy_static::lazy_static! {
    /// Global metrics registry
    pub static ref METRICS_REGISTRY: Registry = Registry::new();

    pub static ref ENTRIES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("photondb_datastore_entries", "Entry slots by kind (allocated, used, dead)"),
        &["store", "kind"]
    ).expect("valid entries gauge");

    pub static ref BUFFERS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("photondb_datastore_buffers", "Buffers by lifecycle state"),
        &["store", "state"]
    ).expect("valid buffers gauge");

    pub static ref GENERATION: IntGaugeVec = IntGaugeVec::new(
        Opts::new("photondb_datastore_generation", "Current and oldest used generation"),
        &["store", "kind"]
    ).expect("valid generation gauge");

    pub static ref COMPACTIONS_TOTAL: IntCounter = IntCounter::new(
        "photondb_datastore_compactions_total",
        "Total compaction passes"
    ).expect("valid compaction counter");

    pub static ref RECLAIMED_BUFFERS_TOTAL: IntCounter = IntCounter::new(
        "photondb_datastore_reclaimed_buffers_total",
        "Total buffers returned to the free pool"
    ).expect("valid reclaim counter");
}

/// Register all metrics with [`METRICS_REGISTRY`]
pub fn init_metrics() {
    info!("Initializing data store metrics");

    METRICS_REGISTRY.register(Box::new(ENTRIES.clone())).ok();
    METRICS_REGISTRY.register(Box::new(BUFFERS.clone())).ok();
    METRICS_REGISTRY.register(Box::new(GENERATION.clone())).ok();
    METRICS_REGISTRY.register(Box::new(COMPACTIONS_TOTAL.clone())).ok();
    METRICS_REGISTRY.register(Box::new(RECLAIMED_BUFFERS_TOTAL.clone())).ok();
}

/// Publish a capacity snapshot under the `store` label
pub fn record_stats(store: &str, stats: &CapacityStats) {
    let gauge = |kind: &str, value: u64| {
        ENTRIES
            .with_label_values(&[store, kind])
            .set(i64::try_from(value).unwrap_or(i64::MAX));
    };
    gauge("allocated", stats.allocated_entries);
    gauge("used", stats.used_entries);
    gauge("dead", stats.dead_entries);
    gauge("live", stats.live_entries());

    for (state, count) in [
        ("active", stats.active_buffers),
        ("hold", stats.hold_buffers),
        ("pending_reclaim", stats.pending_reclaim_buffers),
        ("free", stats.free_buffers),
    ] {
        BUFFERS
            .with_label_values(&[store, state])
            .set(count as i64);
    }

    GENERATION
        .with_label_values(&[store, "current"])
        .set(i64::try_from(stats.generation).unwrap_or(i64::MAX));
    GENERATION
        .with_label_values(&[store, "oldest_used"])
        .set(i64::try_from(stats.oldest_used_generation).unwrap_or(i64::MAX));
}

pub fn record_compaction() {
    COMPACTIONS_TOTAL.inc();
}

pub fn record_reclaimed(buffers: usize) {
    RECLAIMED_BUFFERS_TOTAL.inc_by(buffers as u64);
}

/// Export all metrics in Prometheus text format
pub fn export_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|_| String::from("# Error converting metrics\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_record_stats() {
        let stats = CapacityStats {
            allocated_entries: 64,
            used_entries: 40,
            dead_entries: 10,
            active_buffers: 1,
            hold_buffers: 2,
            generation: 5,
            oldest_used_generation: 3,
            ..Default::default()
        };
        record_stats("metrics_test", &stats);

        assert_eq!(ENTRIES.with_label_values(&["metrics_test", "live"]).get(), 30);
        assert_eq!(BUFFERS.with_label_values(&["metrics_test", "hold"]).get(), 2);
        assert_eq!(
            GENERATION.with_label_values(&["metrics_test", "oldest_used"]).get(),
            3
        );
    }

    #[test]
    fn test_counters_increase() {
        let before = COMPACTIONS_TOTAL.get();
        record_compaction();
        assert!(COMPACTIONS_TOTAL.get() > before);

        let before = RECLAIMED_BUFFERS_TOTAL.get();
        record_reclaimed(3);
        assert!(RECLAIMED_BUFFERS_TOTAL.get() >= before + 3);
    }

    #[test]
    fn test_export_metrics() {
        init_metrics();
        record_stats("export_test", &CapacityStats::default());
        let output = export_metrics();
        assert!(output.contains("photondb_datastore_"));
    }
}
