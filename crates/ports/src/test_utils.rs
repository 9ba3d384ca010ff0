//! Shared test doubles for the secondary ports.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use domain::common::error::DomainError;
use domain::flow::record::Record;
use domain::iface::entity::{Interface, InterfaceEvent};
use ebpf_common::flow::{FlowKey, FlowMetrics};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::secondary::classifier_port::ClassifierPort;
use crate::secondary::clock_port::MonotonicClock;
use crate::secondary::flow_map_port::FlowMapPort;
use crate::secondary::iface_port::{InterfaceAddrsPort, InterfaceInformerPort};
use crate::secondary::metrics_port::MetricsPort;
use crate::secondary::sink_port::RecordSinkPort;

/// No-op metrics implementation.
pub struct NoopMetrics;

impl MetricsPort for NoopMetrics {
    fn eviction(&self, _evicted_flows: usize) {}
    fn ringbuf_flow(&self) {}
    fn batch_dropped(&self, _reason: &'static str) {}
    fn map_delete_error(&self) {}
    fn set_interfaces_attached(&self, _count: i64) {}
    fn set_kernel_drop_counters(&self, _hashmap_dropped: u64, _ringbuf_dropped: u64) {}
}

/// Flow map double fed with a queue of scripted snapshots.
///
/// Each `snapshot_and_clear` pops the next snapshot; an exhausted queue
/// yields empty maps, like a drained kernel table.
#[derive(Default)]
pub struct ScriptedFlowMap {
    snapshots: VecDeque<HashMap<FlowKey, Vec<FlowMetrics>>>,
    stale_deletions: Arc<Mutex<Vec<(Duration, u64)>>>,
}

impl ScriptedFlowMap {
    pub fn new(snapshots: Vec<HashMap<FlowKey, Vec<FlowMetrics>>>) -> Self {
        Self {
            snapshots: snapshots.into(),
            stale_deletions: Arc::default(),
        }
    }

    /// Shared view of the `delete_stale_entries` calls, usable after the
    /// map has been boxed behind the port.
    pub fn stale_deletions(&self) -> Arc<Mutex<Vec<(Duration, u64)>>> {
        Arc::clone(&self.stale_deletions)
    }
}

impl FlowMapPort for ScriptedFlowMap {
    fn snapshot_and_clear(&mut self) -> Result<HashMap<FlowKey, Vec<FlowMetrics>>, DomainError> {
        Ok(self.snapshots.pop_front().unwrap_or_default())
    }

    fn delete_stale_entries(&mut self, timeout: Duration, now_mono_ns: u64) -> u64 {
        self.stale_deletions
            .lock()
            .unwrap()
            .push((timeout, now_mono_ns));
        0
    }
}

/// Monotonic clock that ticks by a fixed step on every read.
pub struct TickingClock {
    now: AtomicU64,
    step: u64,
}

impl TickingClock {
    pub fn new(start_ns: u64, step_ns: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ns),
            step: step_ns,
        }
    }
}

impl MonotonicClock for TickingClock {
    fn now_ns(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::Relaxed)
    }
}

/// Sink that stores every batch it receives.
#[derive(Default)]
pub struct CollectingSink {
    pub batches: Mutex<Vec<Vec<Record>>>,
}

impl CollectingSink {
    pub fn records(&self) -> Vec<Record> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|b| b.iter().cloned())
            .collect()
    }
}

impl RecordSinkPort for CollectingSink {
    fn send_batch(&self, batch: Vec<Record>) -> Result<(), DomainError> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

/// Classifier double recording register/unregister calls; optionally
/// fails registration for named interfaces.
#[derive(Default)]
pub struct RecordingClassifier {
    pub registered: Mutex<Vec<String>>,
    pub unregistered: Mutex<Vec<String>>,
    pub fail_for: Vec<String>,
}

impl ClassifierPort for RecordingClassifier {
    fn register(&self, iface: &Interface) -> Result<(), DomainError> {
        if self.fail_for.contains(&iface.name) {
            return Err(DomainError::AttachError(format!(
                "scripted failure for {}",
                iface.name
            )));
        }
        self.registered.lock().unwrap().push(iface.name.clone());
        Ok(())
    }

    fn unregister(&self, iface: &Interface) -> Result<(), DomainError> {
        self.unregistered.lock().unwrap().push(iface.name.clone());
        Ok(())
    }
}

/// Informer double backed by a pre-created channel pair.
pub struct ChannelInformer {
    rx: Mutex<Option<mpsc::Receiver<InterfaceEvent>>>,
}

impl ChannelInformer {
    pub fn new(capacity: usize) -> (Self, mpsc::Sender<InterfaceEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                rx: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl InterfaceInformerPort for ChannelInformer {
    fn subscribe(
        &self,
        _cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<InterfaceEvent>, DomainError> {
        self.rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| DomainError::NetlinkError("already subscribed".into()))
    }
}

/// Address lookup double with a static name → addresses table.
#[derive(Default)]
pub struct StaticAddrs {
    pub addrs: HashMap<String, Vec<IpAddr>>,
}

impl InterfaceAddrsPort for StaticAddrs {
    async fn addresses(&self, iface: &Interface) -> Result<Vec<IpAddr>, DomainError> {
        Ok(self.addrs.get(&iface.name).cloned().unwrap_or_default())
    }
}
