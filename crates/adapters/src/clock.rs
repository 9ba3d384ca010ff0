use nix::time::{ClockId, clock_gettime};
use ports::secondary::clock_port::MonotonicClock;
use tracing::warn;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// CLOCK_MONOTONIC reader.
///
/// Eviction compares its readings against kernel-written
/// `bpf_ktime_get_ns` timestamps, so the value must come from the same
/// since-boot timeline; an `Instant` anchored at process start would
/// not do.
pub struct SystemMonotonicClock;

impl SystemMonotonicClock {
    /// Probe CLOCK_MONOTONIC once, so an unusable clock fails startup
    /// instead of corrupting the eviction loop later.
    pub fn probe() -> Result<Self, anyhow::Error> {
        clock_gettime(ClockId::CLOCK_MONOTONIC)
            .map_err(|errno| anyhow::anyhow!("CLOCK_MONOTONIC unavailable: {errno}"))?;
        Ok(Self)
    }
}

impl MonotonicClock for SystemMonotonicClock {
    fn now_ns(&self) -> u64 {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            Ok(ts) => ts.tv_sec() as u64 * NANOS_PER_SEC + ts.tv_nsec() as u64,
            Err(errno) => {
                // the clock was probed at startup; a zero reading keeps
                // the staleness filter and stale-entry cutoff inert
                // instead of evicting live flows
                warn!(%errno, "clock_gettime(CLOCK_MONOTONIC) failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_succeeds_on_linux() {
        assert!(SystemMonotonicClock::probe().is_ok());
    }

    #[test]
    fn monotonic_clock_is_nonzero_and_monotone() {
        let clock = SystemMonotonicClock::probe().unwrap();
        let a = clock.now_ns();
        let b = clock.now_ns();
        assert!(a > 0);
        assert!(b >= a);
    }
}
