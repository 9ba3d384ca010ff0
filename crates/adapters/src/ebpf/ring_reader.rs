use std::sync::Arc;
use std::time::Duration;

use application::map_tracer::EvictionTrigger;
use aya::Ebpf;
use aya::maps::{MapData, RingBuf};
use domain::flow::wire::{self, RawRecord};
use ebpf_common::flow::DIRECT_FLOWS_MAP;
use ports::secondary::metrics_port::{MetricsPort, drop_reason};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reads overflow flow records from the `direct_flows` ring buffer.
///
/// Uses `AsyncFd` for epoll-based readiness and drains every available
/// frame per wakeup. Each record also nudges the map tracer to evict,
/// since overflow traffic means the kernel table is full.
pub struct RingReader {
    ring: AsyncFd<RingBuf<MapData>>,
    metrics: Arc<dyn MetricsPort>,
    /// Cadence of the "ring buffer in use" summary log.
    log_period: Duration,
}

impl RingReader {
    pub fn new(
        ebpf: &mut Ebpf,
        metrics: Arc<dyn MetricsPort>,
        log_period: Duration,
    ) -> Result<Self, anyhow::Error> {
        let map = ebpf
            .take_map(DIRECT_FLOWS_MAP)
            .ok_or_else(|| anyhow::anyhow!("map '{DIRECT_FLOWS_MAP}' not found"))?;
        let ring_buf = RingBuf::try_from(map)?;
        let ring = AsyncFd::with_interest(ring_buf, tokio::io::Interest::READABLE)?;
        info!("overflow ring buffer reader initialized ({DIRECT_FLOWS_MAP})");
        Ok(Self {
            ring,
            metrics,
            log_period,
        })
    }

    /// Reader loop: forwards decoded records to the accounter channel
    /// until cancelled. Dropping `self` on exit closes the ring handle.
    pub async fn run(
        self,
        tx: mpsc::Sender<RawRecord>,
        trigger: EvictionTrigger,
        cancel: CancellationToken,
    ) {
        let mut ring = self.ring;
        let mut seen_since_log: u64 = 0;
        let mut last_log = tokio::time::Instant::now();

        loop {
            let mut guard = tokio::select! {
                () = cancel.cancelled() => break,
                guard = ring.readable_mut() => match guard {
                    Ok(guard) => guard,
                    Err(e) => {
                        warn!(error = %e, "ring buffer readiness error");
                        break;
                    }
                },
            };

            let rb = guard.get_inner_mut();
            while let Some(item) = rb.next() {
                let bytes: &[u8] = &item;
                let record = match wire::decode_record(bytes) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(error = %e, "undecodable ring buffer frame");
                        continue;
                    }
                };
                // make room in the kernel table as soon as possible
                trigger.flush();
                seen_since_log += 1;
                if tx.try_send(record).is_err() {
                    self.metrics.batch_dropped(drop_reason::CHANNEL_FULL);
                }
            }
            guard.clear_ready();

            // summary instead of per-record logging: overflow happens in
            // bursts
            if seen_since_log > 0 && last_log.elapsed() >= self.log_period {
                debug!(
                    flows = seen_since_log,
                    "flows received via ring buffer; consider increasing cache_max_flows"
                );
                seen_since_log = 0;
                last_log = tokio::time::Instant::now();
            }
        }
        debug!("ring buffer reader stopped");
    }
}
