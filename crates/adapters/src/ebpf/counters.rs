use aya::Ebpf;
use aya::maps::{MapData, PerCpuArray};
use ebpf_common::counters::{FLOW_COUNTER_HASHMAP_DROPPED, FLOW_COUNTER_RINGBUF_DROPPED};
use ebpf_common::flow::GLOBAL_COUNTERS_MAP;
use tracing::info;

/// Reads the kernel drop counters out of the `global_counters` per-CPU
/// array. Scraped periodically into the metrics registry.
pub struct GlobalCountersReader {
    map: PerCpuArray<MapData, u32>,
}

impl GlobalCountersReader {
    pub fn new(ebpf: &mut Ebpf) -> Result<Self, anyhow::Error> {
        let map = PerCpuArray::try_from(
            ebpf.take_map(GLOBAL_COUNTERS_MAP)
                .ok_or_else(|| anyhow::anyhow!("map '{GLOBAL_COUNTERS_MAP}' not found"))?,
        )?;
        info!("kernel drop counters acquired ({GLOBAL_COUNTERS_MAP})");
        Ok(Self { map })
    }

    fn sum(&self, index: u32) -> u64 {
        self.map
            .get(&index, 0)
            .map(|values| values.iter().map(|v| u64::from(*v)).sum())
            .unwrap_or(0)
    }

    /// (hashmap_flows_dropped, ringbuf_flows_dropped), summed over CPUs.
    pub fn read(&self) -> (u64, u64) {
        (
            self.sum(FLOW_COUNTER_HASHMAP_DROPPED),
            self.sum(FLOW_COUNTER_RINGBUF_DROPPED),
        )
    }
}
