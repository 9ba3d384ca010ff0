//! Netlink link watcher.
//!
//! Subscribes to RTMGRP_LINK, enumerates the extant links into `Added`
//! events, then translates link updates through an index→name registry:
//! a link that turns up-and-running and is not yet tracked is `Added`, a
//! link that goes down or disappears is `Deleted`. The registry also
//! lets deletion events name interfaces the kernel already forgot.

use std::collections::HashMap;

use domain::common::error::DomainError;
use domain::iface::entity::{Interface, InterfaceEvent};
use futures::StreamExt;
use futures::TryStreamExt;
use netlink_packet_core::NetlinkPayload;
use netlink_packet_route::RouteNetlinkMessage;
use netlink_packet_route::link::{LinkAttribute, LinkFlag, LinkMessage};
use netlink_sys::AsyncSocket;
use netlink_sys::SocketAddr;
use ports::secondary::iface_port::InterfaceInformerPort;
use rtnetlink::constants::RTMGRP_LINK;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct NetlinkWatcher {
    buffer_length: usize,
}

impl NetlinkWatcher {
    pub fn new(buffer_length: usize) -> Self {
        Self { buffer_length }
    }
}

impl InterfaceInformerPort for NetlinkWatcher {
    fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<InterfaceEvent>, DomainError> {
        let (tx, rx) = mpsc::channel(self.buffer_length);
        tokio::spawn(watch_links(tx, cancel));
        Ok(rx)
    }
}

async fn watch_links(tx: mpsc::Sender<InterfaceEvent>, cancel: CancellationToken) {
    let (mut connection, handle, mut messages) = match rtnetlink::new_connection() {
        Ok(parts) => parts,
        Err(e) => {
            warn!(error = %e, "cannot open rtnetlink connection, no interface events");
            return;
        }
    };
    let group_addr = SocketAddr::new(0, RTMGRP_LINK);
    if let Err(e) = connection.socket_mut().socket_mut().bind(&group_addr) {
        warn!(error = %e, "cannot join netlink link group, no interface events");
        return;
    }
    tokio::spawn(connection);

    let mut registry = LinkRegistry::default();

    // initial enumeration: one Added per extant link, whatever its
    // operational state
    let mut links = handle.link().get().execute();
    loop {
        match links.try_next().await {
            Ok(Some(message)) => {
                let mut view = link_view(&message, false);
                view.up_and_running = true;
                if let Some(event) = registry.apply(&view) {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "link enumeration failed");
                break;
            }
        }
    }

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            message = messages.next() => {
                let Some((message, _addr)) = message else { break };
                let NetlinkPayload::InnerMessage(inner) = message.payload else {
                    continue;
                };
                let view = match &inner {
                    RouteNetlinkMessage::NewLink(lm) => link_view(lm, false),
                    RouteNetlinkMessage::DelLink(lm) => link_view(lm, true),
                    _ => continue,
                };
                if let Some(event) = registry.apply(&view) {
                    debug!(?event, "link update");
                    if tx.send(event).await.is_err() {
                        break;
                    }
                }
            }
        }
    }
    debug!("netlink watcher stopped");
}

/// The subset of a link message the registry cares about.
pub(crate) struct LinkView {
    pub index: u32,
    pub name: Option<String>,
    pub up_and_running: bool,
}

fn link_view(message: &LinkMessage, deleted: bool) -> LinkView {
    let name = message.attributes.iter().find_map(|attr| {
        if let LinkAttribute::IfName(name) = attr {
            Some(name.clone())
        } else {
            None
        }
    });
    let flags = &message.header.flags;
    LinkView {
        index: message.header.index,
        name,
        up_and_running: !deleted
            && flags.contains(&LinkFlag::Up)
            && flags.contains(&LinkFlag::Running),
    }
}

/// Index→name tracking with event derivation.
#[derive(Default)]
pub(crate) struct LinkRegistry {
    names: HashMap<u32, String>,
}

impl LinkRegistry {
    pub(crate) fn apply(&mut self, view: &LinkView) -> Option<InterfaceEvent> {
        if view.up_and_running {
            let name = view.name.clone()?;
            match self.names.get(&view.index) {
                Some(tracked) if *tracked == name => None,
                _ => {
                    self.names.insert(view.index, name.clone());
                    Some(InterfaceEvent::Added(Interface::new(name, view.index)))
                }
            }
        } else {
            // deletion names come from the message; the registry entry is
            // only dropped when it still refers to the same link
            let name = view
                .name
                .clone()
                .or_else(|| self.names.get(&view.index).cloned())?;
            let tracked = self.names.get(&view.index);
            if tracked.is_none() {
                return None;
            }
            if tracked == Some(&name) {
                self.names.remove(&view.index);
            }
            Some(InterfaceEvent::Deleted(Interface::new(name, view.index)))
        }
    }
}
