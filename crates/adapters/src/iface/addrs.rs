use std::net::IpAddr;

use domain::common::error::DomainError;
use domain::iface::entity::Interface;
use futures::TryStreamExt;
use netlink_packet_route::address::AddressAttribute;
use ports::secondary::iface_port::InterfaceAddrsPort;

/// Resolves assigned addresses through an rtnetlink address dump,
/// filtered to the interface index.
pub struct NetlinkAddrs;

impl InterfaceAddrsPort for NetlinkAddrs {
    async fn addresses(&self, iface: &Interface) -> Result<Vec<IpAddr>, DomainError> {
        let (connection, handle, _) =
            rtnetlink::new_connection().map_err(|e| DomainError::NetlinkError(e.to_string()))?;
        tokio::spawn(connection);

        let mut out = Vec::new();
        let mut addresses = handle
            .address()
            .get()
            .set_link_index_filter(iface.index)
            .execute();
        while let Some(message) = addresses
            .try_next()
            .await
            .map_err(|e| DomainError::NetlinkError(e.to_string()))?
        {
            for attr in &message.attributes {
                if let AddressAttribute::Address(ip) = attr {
                    out.push(*ip);
                }
            }
        }
        Ok(out)
    }
}
