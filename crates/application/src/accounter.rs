//! Userspace flow accounting for overflow records.
//!
//! When the kernel table refuses an insert, single-packet records arrive
//! through the ring buffer. The accounter mirrors the kernel upsert
//! semantics in an in-memory cache and evicts it on a timer or when the
//! cache reaches its size cap. Kernel-written monotonic timestamps are
//! carried through verbatim.

use std::collections::HashMap;
use std::mem;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use domain::flow::record::{Record, accumulate};
use domain::flow::wire::RawRecord;
use ebpf_common::flow::{FlowKey, FlowMetrics};
use ports::secondary::clock_port::MonotonicClock;
use ports::secondary::metrics_port::{MetricsPort, drop_reason};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::InterfaceNamer;

pub struct Accounter {
    max_entries: usize,
    evict_timeout: Duration,
    clock: Arc<dyn MonotonicClock>,
    metrics: Arc<dyn MetricsPort>,
    namer: InterfaceNamer,
    entries: HashMap<FlowKey, FlowMetrics>,
}

impl Accounter {
    pub fn new(
        max_entries: usize,
        evict_timeout: Duration,
        clock: Arc<dyn MonotonicClock>,
        metrics: Arc<dyn MetricsPort>,
        namer: InterfaceNamer,
    ) -> Self {
        Self {
            max_entries,
            evict_timeout,
            clock,
            metrics,
            namer,
            entries: HashMap::new(),
        }
    }

    /// Accounting loop: upserts incoming raw records until the input
    /// closes or `cancel` fires, evicting on the way out.
    pub async fn run(
        mut self,
        mut input: mpsc::Receiver<RawRecord>,
        out: mpsc::Sender<Vec<Record>>,
        cancel: CancellationToken,
    ) {
        let start = tokio::time::Instant::now() + self.evict_timeout;
        let mut ticker = tokio::time::interval_at(start, self.evict_timeout);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    while let Ok(raw) = input.try_recv() {
                        self.account(raw, &out);
                    }
                    self.evict(&out);
                    break;
                }
                _ = ticker.tick() => self.evict(&out),
                raw = input.recv() => match raw {
                    Some(raw) => self.account(raw, &out),
                    None => {
                        debug!("ring record channel closed, evicting remaining entries");
                        self.evict(&out);
                        break;
                    }
                },
            }
        }
        debug!("accounter stopped");
    }

    fn account(&mut self, raw: RawRecord, out: &mpsc::Sender<Vec<Record>>) {
        self.metrics.ringbuf_flow();
        if let Some(stored) = self.entries.get_mut(&raw.key) {
            accumulate(stored, &raw.metrics);
            return;
        }
        if self.entries.len() >= self.max_entries {
            self.evict(out);
        }
        self.entries.insert(raw.key, raw.metrics);
    }

    fn evict(&mut self, out: &mpsc::Sender<Vec<Record>>) {
        if self.entries.is_empty() {
            return;
        }
        let now_wall = SystemTime::now();
        let now_mono = self.clock.now_ns();
        let entries = mem::take(&mut self.entries);
        let count = entries.len();
        let batch: Vec<Record> = entries
            .into_iter()
            .map(|(key, metrics)| {
                let if_index = key.if_index;
                Record::new(key, metrics, now_wall, now_mono, (self.namer)(if_index))
            })
            .collect();
        debug!(count, "accounter entries evicted");
        if out.try_send(batch).is_err() {
            self.metrics.batch_dropped(drop_reason::CHANNEL_FULL);
            warn!(count, "downstream channel full, dropping accounter batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebpf_common::flow::{ERRNO_E2BIG, FLAG_ACK, FLAG_SYN};
    use ports::test_utils::{NoopMetrics, TickingClock};

    fn key(src_port: u16) -> FlowKey {
        let mut k = FlowKey::zeroed();
        k.eth_protocol = 0x0800;
        k.src_port = src_port;
        k.dst_port = 80;
        k.transport_protocol = 6;
        k.if_index = 1;
        k
    }

    fn raw(src_port: u16, bytes: u64, start: u64, end: u64, flags: u16) -> RawRecord {
        RawRecord {
            key: key(src_port),
            metrics: FlowMetrics {
                packets: 1,
                bytes,
                start_mono_ns: start,
                end_mono_ns: end,
                flags,
                dscp: 0,
                errno: ERRNO_E2BIG,
            },
        }
    }

    fn accounter(max_entries: usize) -> Accounter {
        Accounter::new(
            max_entries,
            Duration::from_secs(5),
            Arc::new(TickingClock::new(10_000, 0)),
            Arc::new(NoopMetrics),
            crate::index_namer(),
        )
    }

    #[tokio::test]
    async fn same_key_accumulates_in_cache() {
        let mut acc = accounter(100);
        let (tx, mut rx) = mpsc::channel(4);
        acc.account(raw(1234, 74, 1000, 1000, FLAG_SYN), &tx);
        acc.account(raw(1234, 66, 1500, 1500, FLAG_ACK), &tx);
        acc.evict(&tx);

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 1);
        let m = batch[0].metrics;
        assert_eq!({ m.packets }, 2);
        assert_eq!({ m.bytes }, 140);
        assert_eq!({ m.flags }, FLAG_SYN | FLAG_ACK);
        // monotonic timestamps are the kernel's, not the eviction time
        assert_eq!({ m.start_mono_ns }, 1000);
        assert_eq!({ m.end_mono_ns }, 1500);
        assert_eq!(batch[0].mono_time_ns, 10_000);
    }

    #[tokio::test]
    async fn overflow_records_keep_errno() {
        let mut acc = accounter(100);
        let (tx, mut rx) = mpsc::channel(4);
        acc.account(raw(1234, 74, 1000, 1000, 0), &tx);
        acc.evict(&tx);
        let batch = rx.try_recv().unwrap();
        assert_eq!({ batch[0].metrics.errno }, ERRNO_E2BIG);
    }

    #[tokio::test]
    async fn cache_evicts_when_size_cap_reached() {
        let mut acc = accounter(2);
        let (tx, mut rx) = mpsc::channel(4);
        acc.account(raw(1, 10, 1, 1, 0), &tx);
        acc.account(raw(2, 10, 2, 2, 0), &tx);
        // third distinct key trips the cap: the first two are flushed
        acc.account(raw(3, 10, 3, 3, 0), &tx);
        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.len(), 2);
        acc.evict(&tx);
        assert_eq!(rx.try_recv().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_cache_sends_nothing() {
        let mut acc = accounter(10);
        let (tx, mut rx) = mpsc::channel(4);
        acc.evict(&tx);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_input_evicts_remaining() {
        let acc = accounter(10);
        let (raw_tx, raw_rx) = mpsc::channel(4);
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        raw_tx.send(raw(7, 42, 5, 5, 0)).await.unwrap();
        drop(raw_tx);
        acc.run(raw_rx, tx, cancel).await;

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!({ batch[0].metrics.bytes }, 42);
    }

    #[tokio::test]
    async fn cancellation_drains_pending_records() {
        let acc = accounter(10);
        let (raw_tx, raw_rx) = mpsc::channel(4);
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        raw_tx.send(raw(9, 10, 5, 5, 0)).await.unwrap();
        cancel.cancel();
        acc.run(raw_rx, tx, cancel).await;

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
    }
}
