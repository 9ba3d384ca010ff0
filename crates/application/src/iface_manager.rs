//! Interface lifecycle management.
//!
//! Consumes the informer's event stream and keeps the classifier
//! attached to exactly the interfaces that pass the configured filter.
//! Registration and deregistration are serialized by the registry lock.
//! Kernel-side filters and qdiscs vanish with the interface, so a
//! deletion only needs to update the registry; explicit detach happens
//! on graceful shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use domain::iface::entity::{Interface, InterfaceEvent};
use domain::iface::filter::InterfaceFilter;
use ports::secondary::classifier_port::ClassifierPort;
use ports::secondary::iface_port::{InterfaceAddrsPort, InterfaceInformerPort};
use ports::secondary::metrics_port::MetricsPort;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::InterfaceNamer;

pub struct InterfaceManager<A: InterfaceAddrsPort> {
    filter: InterfaceFilter,
    classifier: Arc<dyn ClassifierPort>,
    addrs: A,
    metrics: Arc<dyn MetricsPort>,
    registry: Mutex<HashMap<String, Interface>>,
    names: Arc<RwLock<HashMap<u32, String>>>,
}

impl<A: InterfaceAddrsPort> InterfaceManager<A> {
    pub fn new(
        filter: InterfaceFilter,
        classifier: Arc<dyn ClassifierPort>,
        addrs: A,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        Self {
            filter,
            classifier,
            addrs,
            metrics,
            registry: Mutex::new(HashMap::new()),
            names: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Index-to-name resolver backed by this manager's registry. Names
    /// outlive interface deletion so late records can still be labeled.
    pub fn namer(&self) -> InterfaceNamer {
        let names = Arc::clone(&self.names);
        Arc::new(move |if_index| {
            names
                .read()
                .ok()
                .and_then(|map| map.get(&if_index).cloned())
                .unwrap_or_else(|| format!("iface-{if_index}"))
        })
    }

    /// Event loop: attach on `Added`, deregister on `Deleted`, detach
    /// everything on cancellation.
    pub async fn run(
        &self,
        informer: &dyn InterfaceInformerPort,
        cancel: CancellationToken,
    ) -> Result<(), domain::common::error::DomainError> {
        let mut events = informer.subscribe(cancel.clone())?;
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.detach_all();
                    break;
                }
                event = events.recv() => match event {
                    Some(InterfaceEvent::Added(iface)) => self.on_added(iface).await,
                    Some(InterfaceEvent::Deleted(iface)) => self.on_deleted(&iface),
                    None => {
                        debug!("interface event stream closed");
                        self.detach_all();
                        break;
                    }
                },
            }
        }
        Ok(())
    }

    async fn on_added(&self, iface: Interface) {
        if let Ok(mut names) = self.names.write() {
            names.insert(iface.index, iface.name.clone());
        }
        if !self.allowed(&iface).await {
            debug!(iface = %iface, "interface does not match the allow/exclusion filters, ignoring");
            return;
        }
        let mut registry = self.registry.lock().unwrap();
        if registry.contains_key(&iface.name) {
            return;
        }
        match self.classifier.register(&iface) {
            Ok(()) => {
                info!(iface = %iface, "interface detected, flow classifier attached");
                registry.insert(iface.name.clone(), iface);
                self.metrics.set_interfaces_attached(registry.len() as i64);
            }
            Err(e) => {
                warn!(iface = %iface, error = %e, "cannot attach flow classifier, ignoring interface");
            }
        }
    }

    fn on_deleted(&self, iface: &Interface) {
        let mut registry = self.registry.lock().unwrap();
        if registry.remove(&iface.name).is_some() {
            info!(iface = %iface, "interface deleted, deregistering");
            // the kernel already dropped the filters with the interface
            if let Err(e) = self.classifier.unregister(iface) {
                debug!(iface = %iface, error = %e, "deregistration cleanup failed");
            }
            self.metrics.set_interfaces_attached(registry.len() as i64);
        }
    }

    fn detach_all(&self) {
        let mut registry = self.registry.lock().unwrap();
        for (_, iface) in registry.drain() {
            if let Err(e) = self.classifier.unregister(&iface) {
                warn!(iface = %iface, error = %e, "cannot detach flow classifier");
            }
        }
        self.metrics.set_interfaces_attached(0);
        debug!("all flow classifiers detached");
    }

    async fn allowed(&self, iface: &Interface) -> bool {
        match &self.filter {
            InterfaceFilter::Names(filter) => filter.allowed(&iface.name),
            InterfaceFilter::Ips(filter) => match self.addrs.addresses(iface).await {
                Ok(addrs) => filter.allowed(&addrs),
                Err(e) => {
                    warn!(iface = %iface, error = %e, "cannot resolve interface addresses, ignoring interface");
                    false
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::iface::entity::IpNetwork;
    use domain::iface::filter::{IpFilter, NameFilter};
    use ports::test_utils::{ChannelInformer, NoopMetrics, RecordingClassifier, StaticAddrs};
    use tokio::sync::mpsc;

    fn name_filter(allowed: &[&str], excluded: &[&str]) -> InterfaceFilter {
        let allowed: Vec<String> = allowed.iter().map(|s| (*s).to_string()).collect();
        let excluded: Vec<String> = excluded.iter().map(|s| (*s).to_string()).collect();
        InterfaceFilter::Names(NameFilter::new(&allowed, &excluded).unwrap())
    }

    async fn drive(
        manager: &InterfaceManager<StaticAddrs>,
        events: Vec<InterfaceEvent>,
    ) -> Result<(), domain::common::error::DomainError> {
        let (informer, tx): (ChannelInformer, mpsc::Sender<InterfaceEvent>) =
            ChannelInformer::new(16);
        for event in events {
            tx.send(event).await.unwrap();
        }
        drop(tx);
        manager.run(&informer, CancellationToken::new()).await
    }

    fn manager(
        filter: InterfaceFilter,
        classifier: Arc<RecordingClassifier>,
    ) -> InterfaceManager<StaticAddrs> {
        InterfaceManager::new(
            filter,
            classifier,
            StaticAddrs::default(),
            Arc::new(NoopMetrics),
        )
    }

    #[tokio::test]
    async fn attaches_in_event_order_and_detaches_on_delete() {
        let classifier = Arc::new(RecordingClassifier::default());
        let mgr = manager(name_filter(&[], &["lo"]), Arc::clone(&classifier));
        drive(
            &mgr,
            vec![
                InterfaceEvent::Added(Interface::new("foo", 1)),
                InterfaceEvent::Added(Interface::new("bar", 2)),
                InterfaceEvent::Added(Interface::new("baz", 3)),
                InterfaceEvent::Added(Interface::new("bae", 4)),
                InterfaceEvent::Deleted(Interface::new("bar", 2)),
            ],
        )
        .await
        .unwrap();

        assert_eq!(
            *classifier.registered.lock().unwrap(),
            vec!["foo", "bar", "baz", "bae"]
        );
        // "bar" deregistered by the delete event, the rest at stream end
        assert_eq!(classifier.unregistered.lock().unwrap()[0], "bar");
        assert_eq!(classifier.unregistered.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn excluded_interfaces_are_ignored() {
        let classifier = Arc::new(RecordingClassifier::default());
        let mgr = manager(name_filter(&[], &["lo"]), Arc::clone(&classifier));
        drive(
            &mgr,
            vec![
                InterfaceEvent::Added(Interface::new("lo", 1)),
                InterfaceEvent::Added(Interface::new("eth0", 2)),
            ],
        )
        .await
        .unwrap();
        assert_eq!(*classifier.registered.lock().unwrap(), vec!["eth0"]);
    }

    #[tokio::test]
    async fn duplicate_added_events_attach_once() {
        let classifier = Arc::new(RecordingClassifier::default());
        let mgr = manager(name_filter(&[], &[]), Arc::clone(&classifier));
        drive(
            &mgr,
            vec![
                InterfaceEvent::Added(Interface::new("eth0", 2)),
                InterfaceEvent::Added(Interface::new("eth0", 2)),
            ],
        )
        .await
        .unwrap();
        assert_eq!(classifier.registered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn attach_failure_skips_interface_but_continues() {
        let classifier = Arc::new(RecordingClassifier {
            fail_for: vec!["flaky0".to_string()],
            ..Default::default()
        });
        let mgr = manager(name_filter(&[], &[]), Arc::clone(&classifier));
        drive(
            &mgr,
            vec![
                InterfaceEvent::Added(Interface::new("flaky0", 1)),
                InterfaceEvent::Added(Interface::new("eth0", 2)),
            ],
        )
        .await
        .unwrap();
        assert_eq!(*classifier.registered.lock().unwrap(), vec!["eth0"]);
    }

    #[tokio::test]
    async fn ip_filter_selects_by_assigned_address() {
        let classifier = Arc::new(RecordingClassifier::default());
        let mut addrs = StaticAddrs::default();
        addrs
            .addrs
            .insert("eth0".into(), vec!["192.168.1.5".parse().unwrap()]);
        addrs
            .addrs
            .insert("eth1".into(), vec!["10.0.0.5".parse().unwrap()]);
        let filter = InterfaceFilter::Ips(IpFilter::new(vec![IpNetwork::V4 {
            addr: 0xC0A8_0100,
            prefix_len: 24,
        }]));
        let mgr = InterfaceManager::new(
            filter,
            Arc::clone(&classifier) as Arc<dyn ClassifierPort>,
            addrs,
            Arc::new(NoopMetrics),
        );
        drive(
            &mgr,
            vec![
                InterfaceEvent::Added(Interface::new("eth0", 1)),
                InterfaceEvent::Added(Interface::new("eth1", 2)),
            ],
        )
        .await
        .unwrap();
        assert_eq!(*classifier.registered.lock().unwrap(), vec!["eth0"]);
    }

    #[tokio::test]
    async fn namer_resolves_known_and_unknown_indexes() {
        let classifier = Arc::new(RecordingClassifier::default());
        let mgr = manager(name_filter(&[], &[]), Arc::clone(&classifier));
        drive(
            &mgr,
            vec![InterfaceEvent::Added(Interface::new("eth0", 7))],
        )
        .await
        .unwrap();
        let namer = mgr.namer();
        assert_eq!(namer(7), "eth0");
        assert_eq!(namer(99), "iface-99");
    }

    #[tokio::test]
    async fn cancellation_detaches_everything() {
        let classifier = Arc::new(RecordingClassifier::default());
        let mgr = Arc::new(manager(name_filter(&[], &[]), Arc::clone(&classifier)));
        let (informer, tx) = ChannelInformer::new(16);
        let cancel = CancellationToken::new();

        tx.send(InterfaceEvent::Added(Interface::new("eth0", 1)))
            .await
            .unwrap();
        let mgr_clone = Arc::clone(&mgr);
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move { mgr_clone.run(&informer, cancel_clone).await });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
        handle.await.unwrap().unwrap();

        assert_eq!(*classifier.unregistered.lock().unwrap(), vec!["eth0"]);
    }
}
