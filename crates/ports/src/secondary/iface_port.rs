use std::net::IpAddr;

use domain::common::error::DomainError;
use domain::iface::entity::{Interface, InterfaceEvent};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Secondary port producing the stream of interface lifecycle events.
///
/// Implementations: the netlink watcher (event driven) and the periodic
/// poller. Both enumerate the extant interfaces first, yielding an
/// `Added` for each, then keep emitting differences until cancelled.
pub trait InterfaceInformerPort: Send + Sync {
    fn subscribe(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<InterfaceEvent>, DomainError>;
}

/// Secondary port resolving the addresses currently assigned to an
/// interface, for the CIDR-based interface selector.
#[allow(async_fn_in_trait)]
pub trait InterfaceAddrsPort: Send + Sync {
    async fn addresses(&self, iface: &Interface) -> Result<Vec<IpAddr>, DomainError>;
}
