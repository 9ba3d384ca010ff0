use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use aya::Ebpf;
use aya::maps::{MapData, PerCpuHashMap};
use domain::common::error::DomainError;
use ebpf_common::flow::{AGGREGATED_FLOWS_MAP, FlowKey, FlowMetrics};
use ports::secondary::flow_map_port::FlowMapPort;
use ports::secondary::metrics_port::MetricsPort;
use tracing::{info, warn};

/// `FlowMapPort` over the kernel `aggregated_flows` per-CPU hash map.
pub struct FlowMapAdapter {
    map: PerCpuHashMap<MapData, FlowKey, FlowMetrics>,
    metrics: Arc<dyn MetricsPort>,
}

impl FlowMapAdapter {
    /// Take ownership of the flow map from the loaded eBPF object.
    pub fn new(ebpf: &mut Ebpf, metrics: Arc<dyn MetricsPort>) -> Result<Self, anyhow::Error> {
        let map = PerCpuHashMap::try_from(
            ebpf.take_map(AGGREGATED_FLOWS_MAP)
                .ok_or_else(|| anyhow::anyhow!("map '{AGGREGATED_FLOWS_MAP}' not found"))?,
        )?;
        info!("flow accounting map acquired ({AGGREGATED_FLOWS_MAP})");
        Ok(Self { map, metrics })
    }
}

impl FlowMapPort for FlowMapAdapter {
    /// Get-and-delete a whole snapshot of the map, key by key, so
    /// packets keep accounting on the eBPF side while we drain here.
    /// Under heavy load a racing update between lookup and delete can
    /// lose a flow; that is the documented lossy trade-off.
    fn snapshot_and_clear(&mut self) -> Result<HashMap<FlowKey, Vec<FlowMetrics>>, DomainError> {
        let keys: Vec<FlowKey> = self.map.keys().filter_map(Result::ok).collect();
        let mut flows = HashMap::with_capacity(keys.len());
        for key in keys {
            let Ok(shards) = self.map.get(&key, 0) else {
                continue;
            };
            if let Err(e) = self.map.remove(&key) {
                warn!(error = %e, "couldn't delete flow entry");
                self.metrics.map_delete_error();
            }
            // A per-CPU map can surface the same key more than once;
            // shards from every occurrence are joined and re-aggregated
            // in userspace.
            flows
                .entry(key)
                .or_insert_with(Vec::new)
                .extend(shards.iter().copied());
        }
        Ok(flows)
    }

    fn delete_stale_entries(&mut self, timeout: Duration, now_mono_ns: u64) -> u64 {
        let cutoff = now_mono_ns.saturating_sub(timeout.as_nanos() as u64);
        let keys: Vec<FlowKey> = self.map.keys().filter_map(Result::ok).collect();
        let mut removed = 0;
        for key in keys {
            let Ok(shards) = self.map.get(&key, 0) else {
                continue;
            };
            let newest = shards.iter().map(|m| m.end_mono_ns).max().unwrap_or(0);
            if newest <= cutoff && self.map.remove(&key).is_ok() {
                removed += 1;
            }
        }
        removed
    }
}
