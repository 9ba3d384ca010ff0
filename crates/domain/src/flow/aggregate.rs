//! Per-CPU shard aggregation.
//!
//! The kernel table is per-CPU: one flow key maps to one shard per CPU,
//! and the map is not zeroed between snapshot cycles, so a snapshot can
//! carry residues from earlier cycles. Aggregation folds the live shards
//! into a single metrics value and discards the residue.

use ebpf_common::flow::FlowMetrics;

use super::record::accumulate;

/// Fold the per-CPU shards of one key into a single value.
///
/// A shard is residue, and is skipped, when its timestamps do not reach
/// past `last_eviction_ns`. A zero `start_mono_ns` is a transient state
/// from a concurrent create, not a residue marker: such shards are kept
/// as long as their end timestamp is fresh, and the aggregated start is
/// the minimum over the non-zero starts.
///
/// Returns `None` when every shard was residue.
pub fn aggregate_shards(shards: &[FlowMetrics], last_eviction_ns: u64) -> Option<FlowMetrics> {
    let mut acc = FlowMetrics::zeroed();
    for shard in shards {
        let start = shard.start_mono_ns;
        let end = shard.end_mono_ns;
        if end <= last_eviction_ns || (start != 0 && start <= last_eviction_ns) {
            continue;
        }
        accumulate(&mut acc, shard);
    }
    if acc.end_mono_ns == 0 { None } else { Some(acc) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard(packets: u32, bytes: u64, start: u64, end: u64) -> FlowMetrics {
        FlowMetrics {
            packets,
            bytes,
            start_mono_ns: start,
            end_mono_ns: end,
            flags: 0,
            dscp: 0,
            errno: 0,
        }
    }

    #[test]
    fn concurrent_create_race_is_repaired() {
        // One CPU inserted with NOEXIST, another saw the entry before the
        // start timestamp was written.
        let shards = [shard(3, 300, 0, 1000), shard(2, 200, 900, 1100)];
        let aggr = aggregate_shards(&shards, 0).unwrap();
        assert_eq!({ aggr.packets }, 5);
        assert_eq!({ aggr.bytes }, 500);
        assert_eq!({ aggr.start_mono_ns }, 900);
        assert_eq!({ aggr.end_mono_ns }, 1100);
    }

    #[test]
    fn stale_shards_are_discarded() {
        let shards = [shard(10, 1000, 100, 200), shard(1, 50, 900, 950)];
        let aggr = aggregate_shards(&shards, 500).unwrap();
        assert_eq!({ aggr.packets }, 1);
        assert_eq!({ aggr.bytes }, 50);
    }

    #[test]
    fn all_stale_yields_none() {
        let shards = [shard(10, 1000, 100, 200)];
        assert!(aggregate_shards(&shards, 500).is_none());
    }

    #[test]
    fn empty_shards_yield_none() {
        assert!(aggregate_shards(&[], 0).is_none());
    }

    #[test]
    fn flags_are_or_combined_across_shards() {
        let mut a = shard(1, 10, 1000, 1000);
        a.flags = 0b0000_0010;
        let mut b = shard(1, 10, 1001, 1001);
        b.flags = 0b0001_0000;
        let aggr = aggregate_shards(&[a, b], 0).unwrap();
        assert_eq!({ aggr.flags }, 0b0001_0010);
    }

    #[test]
    fn dscp_takes_any_nonzero() {
        let a = shard(1, 10, 1000, 1000);
        let mut b = shard(1, 10, 1001, 1001);
        b.dscp = 46;
        let aggr = aggregate_shards(&[a, b], 0).unwrap();
        assert_eq!({ aggr.dscp }, 46);
    }

    #[test]
    fn end_before_last_eviction_never_survives() {
        // Invariant: no emitted record carries end <= last_eviction_ns.
        let shards = [shard(1, 10, 600, 500)];
        assert!(aggregate_shards(&shards, 500).is_none());
    }
}
