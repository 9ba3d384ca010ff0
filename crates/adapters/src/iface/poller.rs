//! Fallback interface discovery by periodic polling.
//!
//! Lists the system interfaces every poll period and emits the
//! set-difference against the previous snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use domain::common::error::DomainError;
use domain::iface::entity::{Interface, InterfaceEvent};
use futures::TryStreamExt;
use netlink_packet_route::link::LinkAttribute;
use ports::secondary::iface_port::InterfaceInformerPort;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Interface enumeration, swappable for tests.
#[allow(async_fn_in_trait)]
pub trait InterfaceLister: Send + Sync + 'static {
    fn list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Interface>, DomainError>> + Send;
}

/// Production lister backed by an rtnetlink link dump.
pub struct NetlinkLister;

impl InterfaceLister for NetlinkLister {
    async fn list(&self) -> Result<Vec<Interface>, DomainError> {
        let (connection, handle, _) =
            rtnetlink::new_connection().map_err(|e| DomainError::NetlinkError(e.to_string()))?;
        tokio::spawn(connection);

        let mut interfaces = Vec::new();
        let mut links = handle.link().get().execute();
        while let Some(message) = links
            .try_next()
            .await
            .map_err(|e| DomainError::NetlinkError(e.to_string()))?
        {
            let name = message.attributes.iter().find_map(|attr| {
                if let LinkAttribute::IfName(name) = attr {
                    Some(name.clone())
                } else {
                    None
                }
            });
            if let Some(name) = name {
                interfaces.push(Interface::new(name, message.header.index));
            }
        }
        Ok(interfaces)
    }
}

pub struct Poller<L: InterfaceLister> {
    period: Duration,
    buffer_length: usize,
    lister: Arc<L>,
}

impl<L: InterfaceLister> Poller<L> {
    pub fn new(period: Duration, buffer_length: usize, lister: L) -> Self {
        Self {
            period,
            buffer_length,
            lister: Arc::new(lister),
        }
    }
}

impl<L: InterfaceLister> InterfaceInformerPort for Poller<L> {
    fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<InterfaceEvent>, DomainError> {
        let (tx, rx) = mpsc::channel(self.buffer_length);
        let lister = Arc::clone(&self.lister);
        let period = self.period;
        tokio::spawn(async move {
            let mut previous: Vec<Interface> = Vec::new();
            loop {
                match lister.list().await {
                    Ok(current) => {
                        for event in diff_snapshots(&previous, &current) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        previous = current;
                    }
                    Err(e) => warn!(error = %e, "interface poll failed"),
                }
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(period) => {}
                }
            }
            debug!("interface poller stopped");
        });
        Ok(rx)
    }
}

/// `Added(S₂ \ S₁)` then `Deleted(S₁ \ S₂)`, both in snapshot order.
fn diff_snapshots(previous: &[Interface], current: &[Interface]) -> Vec<InterfaceEvent> {
    let prev_names: HashMap<&str, u32> = previous
        .iter()
        .map(|i| (i.name.as_str(), i.index))
        .collect();
    let curr_names: HashMap<&str, u32> =
        current.iter().map(|i| (i.name.as_str(), i.index)).collect();

    let mut events = Vec::new();
    for iface in current {
        if !prev_names.contains_key(iface.name.as_str()) {
            events.push(InterfaceEvent::Added(iface.clone()));
        }
    }
    for iface in previous {
        if !curr_names.contains_key(iface.name.as_str()) {
            events.push(InterfaceEvent::Deleted(iface.clone()));
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn ifaces(names: &[(&str, u32)]) -> Vec<Interface> {
        names
            .iter()
            .map(|(name, index)| Interface::new(*name, *index))
            .collect()
    }

    #[test]
    fn first_snapshot_adds_everything() {
        let events = diff_snapshots(&[], &ifaces(&[("foo", 1), ("bar", 2)]));
        assert_eq!(
            events,
            vec![
                InterfaceEvent::Added(Interface::new("foo", 1)),
                InterfaceEvent::Added(Interface::new("bar", 2)),
            ]
        );
    }

    #[test]
    fn set_difference_of_consecutive_snapshots() {
        let events = diff_snapshots(
            &ifaces(&[("foo", 1), ("bar", 2)]),
            &ifaces(&[("foo", 1), ("bae", 4)]),
        );
        assert_eq!(
            events,
            vec![
                InterfaceEvent::Added(Interface::new("bae", 4)),
                InterfaceEvent::Deleted(Interface::new("bar", 2)),
            ]
        );
    }

    #[test]
    fn identical_snapshots_emit_nothing() {
        let snapshot = ifaces(&[("foo", 1)]);
        assert!(diff_snapshots(&snapshot, &snapshot).is_empty());
    }

    struct ScriptedLister {
        snapshots: Mutex<Vec<Vec<Interface>>>,
    }

    impl InterfaceLister for ScriptedLister {
        async fn list(&self) -> Result<Vec<Interface>, DomainError> {
            let mut snapshots = self.snapshots.lock().unwrap();
            if snapshots.len() > 1 {
                Ok(snapshots.remove(0))
            } else {
                Ok(snapshots[0].clone())
            }
        }
    }

    #[tokio::test]
    async fn poller_emits_diffs_across_polls() {
        let lister = ScriptedLister {
            snapshots: Mutex::new(vec![
                ifaces(&[("foo", 1), ("bar", 2)]),
                ifaces(&[("foo", 1), ("bae", 4)]),
            ]),
        };
        let poller = Poller::new(Duration::from_millis(5), 16, lister);
        let cancel = CancellationToken::new();
        let mut events = poller.subscribe(cancel.clone()).unwrap();

        assert_eq!(
            events.recv().await.unwrap(),
            InterfaceEvent::Added(Interface::new("foo", 1))
        );
        assert_eq!(
            events.recv().await.unwrap(),
            InterfaceEvent::Added(Interface::new("bar", 2))
        );
        assert_eq!(
            events.recv().await.unwrap(),
            InterfaceEvent::Added(Interface::new("bae", 4))
        );
        assert_eq!(
            events.recv().await.unwrap(),
            InterfaceEvent::Deleted(Interface::new("bar", 2))
        );
        // steady state: no further events
        cancel.cancel();
        assert!(events.recv().await.is_none());
    }
}
