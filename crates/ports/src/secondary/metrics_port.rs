/// Secondary port for the pipeline's observability counters.
///
/// Hot paths never propagate errors upward; they surface them here.
pub trait MetricsPort: Send + Sync {
    /// One eviction cycle completed, forwarding `evicted_flows` records.
    fn eviction(&self, evicted_flows: usize);

    /// One record arrived via the overflow ring buffer.
    fn ringbuf_flow(&self);

    /// A whole batch was dropped at a channel boundary.
    fn batch_dropped(&self, reason: &'static str);

    /// A kernel map delete failed during snapshot-and-clear.
    fn map_delete_error(&self);

    /// Number of interfaces currently carrying an attached classifier.
    fn set_interfaces_attached(&self, count: i64);

    /// Kernel-side drop counters scraped from the `global_counters` map.
    fn set_kernel_drop_counters(&self, hashmap_dropped: u64, ringbuf_dropped: u64);
}

/// Drop reasons for `batch_dropped`.
pub mod drop_reason {
    pub const CHANNEL_FULL: &str = "channel_full";
    pub const EXPORT_FULL: &str = "export_full";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_port_is_object_safe() {
        fn _check(port: &dyn MetricsPort) {
            port.eviction(0);
        }
    }
}
