//! Flow accounting types shared between the kernel classifier and userspace.
//!
//! Every struct here is `#[repr(C, packed)]` so the kernel-written bytes and
//! the userspace view agree byte for byte, with no padding. `FlowRecord` is
//! also the frame layout of the overflow ring buffer.

/// Length of a MAC address.
pub const MAC_LEN: usize = 6;
/// Length of an IP address slot (IPv6-sized, IPv4 mapped per RFC 4038 §4.2).
pub const IP_LEN: usize = 16;

/// `::ffff/96` prefix carried by every IPv4 address in a flow key.
pub const IP4_IN_6_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_IPV6: u16 = 0x86DD;
pub const ETH_P_8021Q: u16 = 0x8100;

pub const PROTO_TCP: u8 = 6;
pub const PROTO_UDP: u8 = 17;
pub const PROTO_ICMP: u8 = 1;
pub const PROTO_ICMPV6: u8 = 58;

/// Direction values, per IPFIX field 61.
pub const DIRECTION_INGRESS: u8 = 0;
pub const DIRECTION_EGRESS: u8 = 1;

// Observed TCP flags, RFC 9293 bit order.
pub const FLAG_FIN: u16 = 1 << 0;
pub const FLAG_SYN: u16 = 1 << 1;
pub const FLAG_RST: u16 = 1 << 2;
pub const FLAG_PSH: u16 = 1 << 3;
pub const FLAG_ACK: u16 = 1 << 4;
pub const FLAG_URG: u16 = 1 << 5;
pub const FLAG_ECE: u16 = 1 << 6;
pub const FLAG_CWR: u16 = 1 << 7;

// Positive errnos the kernel upsert can hand back; carried in
// `FlowMetrics::errno` on overflow-path records.
pub const ERRNO_E2BIG: u8 = 7;
pub const ERRNO_EBUSY: u8 = 16;
pub const ERRNO_EEXIST: u8 = 17;

/// Name of the per-CPU flow hash map, sized at load time.
pub const AGGREGATED_FLOWS_MAP: &str = "aggregated_flows";
/// Name of the overflow ring buffer.
pub const DIRECT_FLOWS_MAP: &str = "direct_flows";
/// Name of the global drop-counter array.
pub const GLOBAL_COUNTERS_MAP: &str = "global_counters";

/// Overflow ring buffer size: 16 MiB.
pub const DIRECT_FLOWS_BYTE_SIZE: u32 = 1 << 24;

/// Attributes that uniquely identify a flow — 58 bytes.
///
/// Reserved bytes are zero: for non-TCP/UDP the ports are zero, for
/// non-ICMP the icmp fields are zero, and non-IP ethertypes zero the
/// whole L3/L4 block.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub eth_protocol: u16,
    /// 0 = ingress, 1 = egress.
    pub direction: u8,
    pub src_mac: [u8; MAC_LEN],
    pub dst_mac: [u8; MAC_LEN],
    /// IPv4 addresses are encoded with the `::ffff/96` prefix,
    /// as described in RFC 4038 §4.2.
    pub src_ip: [u8; IP_LEN],
    pub dst_ip: [u8; IP_LEN],
    pub src_port: u16,
    pub dst_port: u16,
    pub transport_protocol: u8,
    pub icmp_type: u8,
    pub icmp_code: u8,
    /// OS interface index the packet was seen on.
    pub if_index: u32,
}

impl FlowKey {
    pub const LEN: usize = 58;

    pub const fn zeroed() -> Self {
        Self {
            eth_protocol: 0,
            direction: 0,
            src_mac: [0; MAC_LEN],
            dst_mac: [0; MAC_LEN],
            src_ip: [0; IP_LEN],
            dst_ip: [0; IP_LEN],
            src_port: 0,
            dst_port: 0,
            transport_protocol: 0,
            icmp_type: 0,
            icmp_code: 0,
            if_index: 0,
        }
    }
}

/// Per-CPU accumulated metrics for one flow — 32 bytes.
///
/// Timestamps come from `bpf_ktime_get_ns`. A `start_mono_ns` of zero is a
/// transient state left by a concurrent create; the aggregator repairs it.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowMetrics {
    pub packets: u32,
    pub bytes: u64,
    pub start_mono_ns: u64,
    pub end_mono_ns: u64,
    /// Bitwise OR of the `FLAG_*` bits observed over the flow lifetime.
    pub flags: u16,
    pub dscp: u8,
    /// Positive errno of the failed map insert that pushed this record
    /// onto the ring buffer; zero on the hash-map path.
    pub errno: u8,
}

impl FlowMetrics {
    pub const LEN: usize = 32;

    pub const fn zeroed() -> Self {
        Self {
            packets: 0,
            bytes: 0,
            start_mono_ns: 0,
            end_mono_ns: 0,
            flags: 0,
            dscp: 0,
            errno: 0,
        }
    }
}

/// Key + metrics: the complete frame written to the overflow ring buffer
/// when the hash map refuses an insert — 90 bytes.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRecord {
    pub key: FlowKey,
    pub metrics: FlowMetrics,
}

impl FlowRecord {
    pub const LEN: usize = FlowKey::LEN + FlowMetrics::LEN;
}

/// Sampling gate shared by the classifier and its tests.
///
/// `sampling` of 0 or 1 admits everything; otherwise one packet in
/// `sampling` is admitted, keyed on a uniform random draw.
#[inline]
pub const fn sample_admits(rnd: u32, sampling: u32) -> bool {
    sampling == 0 || rnd % sampling == 0
}

#[cfg(feature = "userspace")]
unsafe impl aya::Pod for FlowKey {}
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for FlowMetrics {}
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for FlowRecord {}
