//! Periodic eviction of the kernel per-CPU flow table.
//!
//! The tracer snapshots and clears the table, folds the per-CPU shards
//! of each key into one record, filters out residues from earlier
//! cycles, and forwards the batch downstream. Timer ticks, overflow
//! nudges from the ring reader, and shutdown all funnel through one
//! notification, so only one eviction runs at a time.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use domain::flow::aggregate::aggregate_shards;
use domain::flow::record::Record;
use ports::secondary::clock_port::MonotonicClock;
use ports::secondary::flow_map_port::FlowMapPort;
use ports::secondary::metrics_port::{MetricsPort, drop_reason};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::InterfaceNamer;

/// Cloneable handle that forces an eviction cycle out of band, used by
/// the ring reader when overflow traffic shows the table is full.
#[derive(Clone)]
pub struct EvictionTrigger(Arc<Notify>);

impl EvictionTrigger {
    pub fn flush(&self) {
        self.0.notify_one();
    }
}

pub struct MapTracer {
    map: Box<dyn FlowMapPort>,
    clock: Arc<dyn MonotonicClock>,
    metrics: Arc<dyn MetricsPort>,
    namer: InterfaceNamer,
    evict_timeout: Duration,
    stale_timeout: Duration,
    last_eviction_ns: u64,
    notify: Arc<Notify>,
}

impl MapTracer {
    pub fn new(
        map: Box<dyn FlowMapPort>,
        clock: Arc<dyn MonotonicClock>,
        metrics: Arc<dyn MetricsPort>,
        namer: InterfaceNamer,
        evict_timeout: Duration,
        stale_timeout: Duration,
    ) -> Self {
        let last_eviction_ns = clock.now_ns();
        Self {
            map,
            clock,
            metrics,
            namer,
            evict_timeout,
            stale_timeout,
            last_eviction_ns,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn trigger(&self) -> EvictionTrigger {
        EvictionTrigger(Arc::clone(&self.notify))
    }

    /// Eviction loop. Exits after one final eviction when `cancel`
    /// fires.
    pub async fn run(mut self, out: mpsc::Sender<Vec<Record>>, cancel: CancellationToken) {
        let start = tokio::time::Instant::now() + self.evict_timeout;
        let mut ticker = tokio::time::interval_at(start, self.evict_timeout);
        let notify = Arc::clone(&self.notify);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("draining flow table before shutdown");
                    self.evict(&out);
                    break;
                }
                _ = ticker.tick() => {
                    debug!("triggering flow eviction on timer");
                    self.evict(&out);
                }
                () = notify.notified() => {
                    debug!("triggering flow eviction on demand");
                    self.evict(&out);
                }
            }
        }
        debug!("map tracer stopped");
    }

    fn evict(&mut self, out: &mpsc::Sender<Vec<Record>>) {
        let now_mono = self.clock.now_ns();
        let now_wall = SystemTime::now();

        let flows = match self.map.snapshot_and_clear() {
            Ok(flows) => flows,
            Err(e) => {
                warn!(error = %e, "flow table snapshot failed, skipping cycle");
                return;
            }
        };

        let mut batch = Vec::with_capacity(flows.len());
        let mut later_ns = 0u64;
        for (key, shards) in flows {
            let Some(aggregated) = aggregate_shards(&shards, self.last_eviction_ns) else {
                // all shards were residue from memory the kernel did not
                // zero between cycles
                continue;
            };
            let end_ns = aggregated.end_mono_ns;
            if end_ns > later_ns {
                later_ns = end_ns;
            }
            let if_index = key.if_index;
            batch.push(Record::new(
                key,
                aggregated,
                now_wall,
                now_mono,
                (self.namer)(if_index),
            ));
        }

        if self.stale_timeout > Duration::ZERO {
            let removed = self.map.delete_stale_entries(self.stale_timeout, now_mono);
            if removed > 0 {
                debug!(removed, "hard-evicted stale flow entries");
            }
        }

        if later_ns > 0 {
            self.last_eviction_ns = later_ns;
        }

        let count = batch.len();
        self.metrics.eviction(count);
        debug!(count, "flows evicted");
        if count == 0 {
            return;
        }
        if out.try_send(batch).is_err() {
            self.metrics.batch_dropped(drop_reason::CHANNEL_FULL);
            warn!(count, "downstream channel full, dropping eviction batch");
        }
    }
}
