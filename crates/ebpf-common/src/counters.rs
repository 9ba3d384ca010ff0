//! Global counter indices for the `global_counters` per-CPU array.
//!
//! The classifier increments these on drop paths that have no other
//! observable side effect; userspace scrapes them into the metrics
//! registry.

/// Flow lost because the hash map insert raced and the re-lookup failed too.
pub const FLOW_COUNTER_HASHMAP_DROPPED: u32 = 0;
/// Flow lost because the overflow ring buffer could not reserve a slot.
pub const FLOW_COUNTER_RINGBUF_DROPPED: u32 = 1;
/// Number of counter slots in the array.
pub const FLOW_COUNTER_LEN: u32 = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_indices_within_bounds() {
        assert!(FLOW_COUNTER_HASHMAP_DROPPED < FLOW_COUNTER_LEN);
        assert!(FLOW_COUNTER_RINGBUF_DROPPED < FLOW_COUNTER_LEN);
        assert_ne!(FLOW_COUNTER_HASHMAP_DROPPED, FLOW_COUNTER_RINGBUF_DROPPED);
    }
}
