mod addrs;
mod poller;
mod watcher;

pub use addrs::NetlinkAddrs;
pub use poller::{InterfaceLister, NetlinkLister, Poller};
pub use watcher::NetlinkWatcher;
