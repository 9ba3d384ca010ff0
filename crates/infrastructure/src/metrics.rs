use ports::secondary::metrics_port::MetricsPort;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    pub reason: String,
}

/// Prometheus metrics registry for the agent.
///
/// All metric families use interior mutability (atomics), so recording
/// metrics only requires `&self`. The registry itself is NOT Clone —
/// wrap in `Arc` for multi-task sharing. Exposition of the registry is
/// owned by the external metrics server, not by the core.
pub struct AgentMetrics {
    registry: Registry,
    pub evictions_total: Counter,
    pub evicted_flows_total: Counter,
    pub ringbuf_flows_total: Counter,
    pub dropped_batches_total: Family<ReasonLabels, Counter>,
    pub map_delete_errors_total: Counter,
    pub interfaces_attached: Gauge,
    pub kernel_hashmap_flows_dropped: Gauge,
    pub kernel_ringbuf_flows_dropped: Gauge,
}

impl AgentMetrics {
    /// Create a new registry with every metric registered under the
    /// `flowlens` prefix.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("flowlens");

        let evictions_total = Counter::default();
        registry.register(
            "evictions",
            "Eviction cycles run against the kernel flow table",
            evictions_total.clone(),
        );

        let evicted_flows_total = Counter::default();
        registry.register(
            "evicted_flows",
            "Aggregated flow records forwarded by the map tracer",
            evicted_flows_total.clone(),
        );

        let ringbuf_flows_total = Counter::default();
        registry.register(
            "ringbuf_flows",
            "Flow records that arrived via the overflow ring buffer",
            ringbuf_flows_total.clone(),
        );

        let dropped_batches_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "dropped_batches",
            "Record batches dropped at a channel boundary",
            dropped_batches_total.clone(),
        );

        let map_delete_errors_total = Counter::default();
        registry.register(
            "map_delete_errors",
            "Failed deletes during flow table snapshots",
            map_delete_errors_total.clone(),
        );

        let interfaces_attached = Gauge::default();
        registry.register(
            "interfaces_attached",
            "Interfaces currently carrying the flow classifier",
            interfaces_attached.clone(),
        );

        let kernel_hashmap_flows_dropped = Gauge::default();
        registry.register(
            "kernel_hashmap_flows_dropped",
            "Kernel-side flows lost after a failed hash map upsert",
            kernel_hashmap_flows_dropped.clone(),
        );

        let kernel_ringbuf_flows_dropped = Gauge::default();
        registry.register(
            "kernel_ringbuf_flows_dropped",
            "Kernel-side flows lost because the ring buffer was full",
            kernel_ringbuf_flows_dropped.clone(),
        );

        Self {
            registry,
            evictions_total,
            evicted_flows_total,
            ringbuf_flows_total,
            dropped_batches_total,
            map_delete_errors_total,
            interfaces_attached,
            kernel_hashmap_flows_dropped,
            kernel_ringbuf_flows_dropped,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsPort for AgentMetrics {
    fn eviction(&self, evicted_flows: usize) {
        self.evictions_total.inc();
        self.evicted_flows_total.inc_by(evicted_flows as u64);
    }

    fn ringbuf_flow(&self) {
        self.ringbuf_flows_total.inc();
    }

    fn batch_dropped(&self, reason: &'static str) {
        self.dropped_batches_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }

    fn map_delete_error(&self) {
        self.map_delete_errors_total.inc();
    }

    fn set_interfaces_attached(&self, count: i64) {
        self.interfaces_attached.set(count);
    }

    fn set_kernel_drop_counters(&self, hashmap_dropped: u64, ringbuf_dropped: u64) {
        self.kernel_hashmap_flows_dropped.set(hashmap_dropped as i64);
        self.kernel_ringbuf_flows_dropped.set(ringbuf_dropped as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eviction_updates_both_counters() {
        let metrics = AgentMetrics::new();
        metrics.eviction(3);
        metrics.eviction(2);
        assert_eq!(metrics.evictions_total.get(), 2);
        assert_eq!(metrics.evicted_flows_total.get(), 5);
    }

    #[test]
    fn drop_reasons_are_labeled() {
        let metrics = AgentMetrics::new();
        metrics.batch_dropped("channel_full");
        metrics.batch_dropped("channel_full");
        metrics.batch_dropped("export_full");
        assert_eq!(
            metrics
                .dropped_batches_total
                .get_or_create(&ReasonLabels {
                    reason: "channel_full".to_string()
                })
                .get(),
            2
        );
    }

    #[test]
    fn kernel_drop_gauges_track_latest_scrape() {
        let metrics = AgentMetrics::new();
        metrics.set_kernel_drop_counters(7, 3);
        metrics.set_kernel_drop_counters(9, 4);
        assert_eq!(metrics.kernel_hashmap_flows_dropped.get(), 9);
        assert_eq!(metrics.kernel_ringbuf_flows_dropped.get(), 4);
    }

    #[test]
    fn interfaces_gauge() {
        let metrics = AgentMetrics::new();
        metrics.set_interfaces_attached(4);
        assert_eq!(metrics.interfaces_attached.get(), 4);
    }
}
