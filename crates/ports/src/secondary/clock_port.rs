/// Monotonic time source comparable with the kernel's `bpf_ktime_get_ns`.
///
/// Behind a port so the eviction loops can be tested with a scripted
/// clock.
pub trait MonotonicClock: Send + Sync {
    fn now_ns(&self) -> u64;
}
