use std::collections::HashMap;
use std::time::Duration;

use domain::common::error::DomainError;
use ebpf_common::flow::{FlowKey, FlowMetrics};

/// Secondary port for the kernel per-CPU flow table.
///
/// Implemented over `aggregated_flows` by the eBPF adapter; the map
/// tracer only sees snapshots.
pub trait FlowMapPort: Send {
    /// Atomically drain the table: every key is looked up, deleted, and
    /// returned with one metrics shard per CPU. A failed delete on a
    /// single key is surfaced as a counter by the implementation, not as
    /// an error; the shards are still returned.
    fn snapshot_and_clear(&mut self) -> Result<HashMap<FlowKey, Vec<FlowMetrics>>, DomainError>;

    /// Remove entries whose shards were all last touched more than
    /// `timeout` before `now_mono_ns`, without forwarding them. Returns
    /// the number of entries removed.
    fn delete_stale_entries(&mut self, timeout: Duration, now_mono_ns: u64) -> u64;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_map_port_is_object_safe() {
        fn _check(port: &mut dyn FlowMapPort) {
            let _ = port.snapshot_and_clear();
        }
    }
}
