//! Userspace flow records: the decoded form that flows through the
//! pipeline from eviction to the exporter boundary.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use ebpf_common::flow::{FlowKey, FlowMetrics};

/// One duplicate observation merged into a first-seen record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DupEntry {
    pub interface: String,
    pub direction: u8,
}

/// Merge list shared between a forwarded record and the deduper cache
/// entry, so later duplicates can append to an already forwarded record.
pub type DupList = Arc<Mutex<Vec<DupEntry>>>;

/// A flow record after aggregation, annotated with capture-time context.
///
/// `mono_time_ns` is the userspace monotonic clock at eviction time and
/// lets the consumer translate the kernel monotonic timestamps in
/// `metrics` to wall time relative to `wall_time`.
#[derive(Debug, Clone)]
pub struct Record {
    pub key: FlowKey,
    pub metrics: FlowMetrics,
    pub wall_time: SystemTime,
    pub mono_time_ns: u64,
    pub interface: String,
    pub duplicate: bool,
    pub dup_list: Option<DupList>,
}

impl Record {
    pub fn new(
        key: FlowKey,
        metrics: FlowMetrics,
        wall_time: SystemTime,
        mono_time_ns: u64,
        interface: String,
    ) -> Self {
        Self {
            key,
            metrics,
            wall_time,
            mono_time_ns,
            interface,
            duplicate: false,
            dup_list: None,
        }
    }
}

/// Fold `other` into `acc`, preserving the flow-lifetime semantics:
/// counters add, the start is the earliest known (zero means unknown),
/// the end is the high-water mark, flags accumulate under OR.
pub fn accumulate(acc: &mut FlowMetrics, other: &FlowMetrics) {
    acc.packets += other.packets;
    acc.bytes += other.bytes;
    if acc.start_mono_ns == 0
        || (other.start_mono_ns != 0 && other.start_mono_ns < acc.start_mono_ns)
    {
        acc.start_mono_ns = other.start_mono_ns;
    }
    if other.end_mono_ns > acc.end_mono_ns {
        acc.end_mono_ns = other.end_mono_ns;
    }
    acc.flags |= other.flags;
    if other.dscp != 0 {
        acc.dscp = other.dscp;
    }
    if acc.errno == 0 {
        acc.errno = other.errno;
    }
}

/// Decode an IP slot from a flow key. Addresses carrying the RFC 4038
/// `::ffff/96` prefix come back as plain IPv4.
pub fn ip_addr(bytes: &[u8; 16]) -> IpAddr {
    let v6 = Ipv6Addr::from(*bytes);
    match v6.to_ipv4_mapped() {
        Some(v4) => IpAddr::V4(v4),
        None => IpAddr::V6(v6),
    }
}

/// Encode an IP address into a flow-key slot.
pub fn ip_bytes(addr: IpAddr) -> [u8; 16] {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => v6.octets(),
    }
}

pub fn mac_string(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// Convenience for tests and logging.
pub fn ipv4_key_bytes(addr: Ipv4Addr) -> [u8; 16] {
    ip_bytes(IpAddr::V4(addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebpf_common::flow::{FLAG_ACK, FLAG_SYN};

    fn metrics(packets: u32, bytes: u64, start: u64, end: u64, flags: u16) -> FlowMetrics {
        FlowMetrics {
            packets,
            bytes,
            start_mono_ns: start,
            end_mono_ns: end,
            flags,
            dscp: 0,
            errno: 0,
        }
    }

    #[test]
    fn accumulate_sums_counters_and_ors_flags() {
        let mut acc = metrics(1, 74, 1000, 1000, FLAG_SYN);
        accumulate(&mut acc, &metrics(1, 66, 1500, 1500, FLAG_ACK));
        assert_eq!({ acc.packets }, 2);
        assert_eq!({ acc.bytes }, 140);
        assert_eq!({ acc.start_mono_ns }, 1000);
        assert_eq!({ acc.end_mono_ns }, 1500);
        assert_eq!({ acc.flags }, FLAG_SYN | FLAG_ACK);
    }

    #[test]
    fn accumulate_treats_zero_start_as_unknown() {
        let mut acc = metrics(3, 300, 0, 1000, 0);
        accumulate(&mut acc, &metrics(2, 200, 900, 1100, 0));
        assert_eq!({ acc.start_mono_ns }, 900);
        assert_eq!({ acc.end_mono_ns }, 1100);
        assert_eq!({ acc.packets }, 5);
    }

    #[test]
    fn accumulate_keeps_earliest_nonzero_start() {
        let mut acc = metrics(1, 10, 500, 600, 0);
        accumulate(&mut acc, &metrics(1, 10, 400, 700, 0));
        assert_eq!({ acc.start_mono_ns }, 400);
    }

    #[test]
    fn ipv4_mapped_roundtrip() {
        let encoded = ipv4_key_bytes(Ipv4Addr::new(6, 7, 8, 9));
        assert_eq!(&encoded[..10], &[0u8; 10]);
        assert_eq!(&encoded[10..12], &[0xff, 0xff]);
        assert_eq!(&encoded[12..], &[6, 7, 8, 9]);
        assert_eq!(ip_addr(&encoded), IpAddr::V4(Ipv4Addr::new(6, 7, 8, 9)));
    }

    #[test]
    fn plain_ipv6_stays_ipv6() {
        let v6: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let encoded = ip_bytes(IpAddr::V6(v6));
        assert_eq!(ip_addr(&encoded), IpAddr::V6(v6));
    }

    #[test]
    fn mac_formatting() {
        assert_eq!(
            mac_string(&[0xaa, 0xbb, 0xcc, 0x00, 0x11, 0x22]),
            "aa:bb:cc:00:11:22"
        );
    }
}
