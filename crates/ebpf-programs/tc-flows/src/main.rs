#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::{BPF_NOEXIST, TC_ACT_OK},
    helpers::{bpf_get_prandom_u32, bpf_ktime_get_ns},
    macros::{classifier, map},
    maps::{PerCpuArray, PerCpuHashMap, RingBuf},
    programs::TcContext,
};
use core::mem;
use ebpf_common::counters::{
    FLOW_COUNTER_HASHMAP_DROPPED, FLOW_COUNTER_LEN, FLOW_COUNTER_RINGBUF_DROPPED,
};
use ebpf_common::flow::{
    DIRECTION_EGRESS, DIRECTION_INGRESS, ERRNO_EEXIST, ETH_P_IP, ETH_P_IPV6, FlowKey, FlowMetrics,
    FlowRecord, IP4_IN_6_PREFIX, PROTO_ICMP, PROTO_ICMPV6, PROTO_TCP, PROTO_UDP,
    sample_admits,
};
use network_types::{eth::EthHdr, ip::Ipv4Hdr, tcp::TcpHdr, udp::UdpHdr};

// ── Constants ───────────────────────────────────────────────────────

const IPV6_HDR_LEN: usize = 40;
/// Offset of the flag octet (CWR..FIN) inside the TCP header.
const TCP_FLAGS_OFFSET: usize = 13;

/// Default per-CPU hash capacity; overridden at load time from
/// CACHE_MAX_FLOWS via the loader.
const DEFAULT_MAX_FLOWS: u32 = 5000;

// ── Inline header types ─────────────────────────────────────────────

/// IPv6 fixed header (40 bytes). No extension-header walking: the next
/// header field is taken as the transport protocol.
#[repr(C)]
struct Ipv6Hdr {
    vtcfl: [u8; 4],
    _payload_len: u16,
    next_hdr: u8,
    _hop_limit: u8,
    src_addr: [u8; 16],
    dst_addr: [u8; 16],
}

/// Leading bytes shared by ICMP and ICMPv6 headers.
#[repr(C)]
struct IcmpHdr {
    icmp_type: u8,
    icmp_code: u8,
    _checksum: u16,
}

// ── Maps ────────────────────────────────────────────────────────────

/// Per-CPU flow accounting table. Userspace snapshots and clears it on
/// every eviction cycle.
#[map(name = "aggregated_flows")]
static AGGREGATED_FLOWS: PerCpuHashMap<FlowKey, FlowMetrics> =
    PerCpuHashMap::with_max_entries(DEFAULT_MAX_FLOWS, 0);

/// Overflow conduit: complete single-packet records when the hash map
/// refuses an insert.
#[map(name = "direct_flows")]
static DIRECT_FLOWS: RingBuf =
    RingBuf::with_byte_size(ebpf_common::flow::DIRECT_FLOWS_BYTE_SIZE, 0);

/// Drop counters scraped by userspace.
#[map(name = "global_counters")]
static GLOBAL_COUNTERS: PerCpuArray<u32> = PerCpuArray::with_max_entries(FLOW_COUNTER_LEN, 0);

// ── Load-time configuration ─────────────────────────────────────────

/// 0/1 = process every packet, n > 1 = process one in n.
/// Patched by the loader before the program is verified.
#[no_mangle]
static SAMPLING: u32 = 0;

#[inline(always)]
fn sampling() -> u32 {
    unsafe { core::ptr::read_volatile(&SAMPLING) }
}

// ── Entry points ────────────────────────────────────────────────────

#[classifier]
pub fn ingress_flow_parse(ctx: TcContext) -> i32 {
    flow_parse(&ctx, DIRECTION_INGRESS)
}

#[classifier]
pub fn egress_flow_parse(ctx: TcContext) -> i32 {
    flow_parse(&ctx, DIRECTION_EGRESS)
}

// ── Helpers ─────────────────────────────────────────────────────────

#[inline(always)]
fn u16_from_be_bytes(b: [u8; 2]) -> u16 {
    u16::from_be_bytes(b)
}

#[inline(always)]
fn increment_counter(index: u32) {
    if let Some(counter) = GLOBAL_COUNTERS.get_ptr_mut(index) {
        unsafe {
            *counter += 1;
        }
    }
}

#[inline(always)]
unsafe fn ptr_at<T>(ctx: &TcContext, offset: usize) -> Result<*const T, ()> {
    let start = ctx.data();
    let end = ctx.data_end();
    let len = mem::size_of::<T>();
    if start + offset + len > end {
        return Err(());
    }
    Ok((start + offset) as *const T)
}

// ── Packet parsing ──────────────────────────────────────────────────

/// Per-packet metadata that is not part of the flow key.
struct PktMeta {
    flags: u16,
    dscp: u8,
}

enum Verdict {
    Submit,
    Discard,
}

/// Decode L2–L4 headers into `key`/`pkt`. Any out-of-bounds access
/// discards the packet; ethertypes other than IPv4/IPv6 are submitted
/// with the L3/L4 block left zeroed.
#[inline(always)]
fn fill_headers(ctx: &TcContext, key: &mut FlowKey, pkt: &mut PktMeta) -> Verdict {
    let Ok(ethhdr) = (unsafe { ptr_at::<EthHdr>(ctx, 0) }) else {
        return Verdict::Discard;
    };
    key.src_mac = unsafe { (*ethhdr).src_addr };
    key.dst_mac = unsafe { (*ethhdr).dst_addr };
    key.eth_protocol = u16::from_be(unsafe { (*ethhdr).ether_type });

    match key.eth_protocol {
        ETH_P_IP => fill_ipv4(ctx, EthHdr::LEN, key, pkt),
        ETH_P_IPV6 => fill_ipv6(ctx, EthHdr::LEN, key, pkt),
        _ => Verdict::Submit,
    }
}

#[inline(always)]
fn fill_ipv4(ctx: &TcContext, l3_offset: usize, key: &mut FlowKey, pkt: &mut PktMeta) -> Verdict {
    let Ok(ipv4hdr) = (unsafe { ptr_at::<Ipv4Hdr>(ctx, l3_offset) }) else {
        return Verdict::Discard;
    };

    key.src_ip[..12].copy_from_slice(&IP4_IN_6_PREFIX);
    key.dst_ip[..12].copy_from_slice(&IP4_IN_6_PREFIX);
    let src = unsafe { (*ipv4hdr).src_addr };
    let dst = unsafe { (*ipv4hdr).dst_addr };
    key.src_ip[12..].copy_from_slice(&src);
    key.dst_ip[12..].copy_from_slice(&dst);

    let protocol = unsafe { (*ipv4hdr).proto } as u8;
    key.transport_protocol = protocol;
    pkt.dscp = unsafe { (*ipv4hdr).tos } >> 2;

    fill_l4(ctx, l3_offset + Ipv4Hdr::LEN, protocol, key, pkt)
}

#[inline(always)]
fn fill_ipv6(ctx: &TcContext, l3_offset: usize, key: &mut FlowKey, pkt: &mut PktMeta) -> Verdict {
    let Ok(ipv6hdr) = (unsafe { ptr_at::<Ipv6Hdr>(ctx, l3_offset) }) else {
        return Verdict::Discard;
    };

    key.src_ip = unsafe { (*ipv6hdr).src_addr };
    key.dst_ip = unsafe { (*ipv6hdr).dst_addr };

    let protocol = unsafe { (*ipv6hdr).next_hdr };
    key.transport_protocol = protocol;
    // Traffic class straddles the first two bytes of the version/TC/flow
    // label word; DSCP is its top six bits.
    let vtcfl = unsafe { &(*ipv6hdr).vtcfl };
    let traffic_class = ((vtcfl[0] & 0x0f) << 4) | (vtcfl[1] >> 4);
    pkt.dscp = traffic_class >> 2;

    fill_l4(ctx, l3_offset + IPV6_HDR_LEN, protocol, key, pkt)
}

#[inline(always)]
fn fill_l4(
    ctx: &TcContext,
    l4_offset: usize,
    protocol: u8,
    key: &mut FlowKey,
    pkt: &mut PktMeta,
) -> Verdict {
    match protocol {
        PROTO_TCP => {
            let Ok(tcphdr) = (unsafe { ptr_at::<TcpHdr>(ctx, l4_offset) }) else {
                return Verdict::Discard;
            };
            key.src_port = u16_from_be_bytes(unsafe { (*tcphdr).source });
            key.dst_port = u16_from_be_bytes(unsafe { (*tcphdr).dest });
            // The flag octet maps 1:1 onto the FLAG_* bits (FIN..CWR).
            if let Ok(flag_byte) = unsafe { ptr_at::<u8>(ctx, l4_offset + TCP_FLAGS_OFFSET) } {
                pkt.flags = unsafe { *flag_byte } as u16;
            }
        }
        PROTO_UDP => {
            let Ok(udphdr) = (unsafe { ptr_at::<UdpHdr>(ctx, l4_offset) }) else {
                return Verdict::Discard;
            };
            key.src_port = u16_from_be_bytes(unsafe { (*udphdr).src });
            key.dst_port = u16_from_be_bytes(unsafe { (*udphdr).dst });
        }
        PROTO_ICMP | PROTO_ICMPV6 => {
            let Ok(icmphdr) = (unsafe { ptr_at::<IcmpHdr>(ctx, l4_offset) }) else {
                return Verdict::Discard;
            };
            key.icmp_type = unsafe { (*icmphdr).icmp_type };
            key.icmp_code = unsafe { (*icmphdr).icmp_code };
        }
        _ => {}
    }
    Verdict::Submit
}

// ── Flow accounting ─────────────────────────────────────────────────

/// Parse one packet and upsert it into the per-CPU table; spill to the
/// ring buffer when the table refuses. Never drops traffic.
#[inline(always)]
fn flow_parse(ctx: &TcContext, direction: u8) -> i32 {
    if !sample_admits(unsafe { bpf_get_prandom_u32() }, sampling()) {
        return TC_ACT_OK;
    }

    let mut key = FlowKey::zeroed();
    let mut pkt = PktMeta { flags: 0, dscp: 0 };
    if let Verdict::Discard = fill_headers(ctx, &mut key, &mut pkt) {
        return TC_ACT_OK;
    }
    key.direction = direction;
    key.if_index = unsafe { (*ctx.skb.skb).ifindex };

    let bytes = u64::from(unsafe { (*ctx.skb.skb).len });
    let now = unsafe { bpf_ktime_get_ns() };

    if let Some(entry) = AGGREGATED_FLOWS.get_ptr_mut(&key) {
        accumulate(entry, &pkt, bytes, now);
        return TC_ACT_OK;
    }

    let fresh = FlowMetrics {
        packets: 1,
        bytes,
        start_mono_ns: now,
        end_mono_ns: now,
        flags: pkt.flags,
        dscp: pkt.dscp,
        errno: 0,
    };
    match AGGREGATED_FLOWS.insert(&key, &fresh, BPF_NOEXIST as u64) {
        Ok(()) => {}
        Err(ret) => {
            let errno = -ret;
            if errno == ERRNO_EEXIST as i64 {
                // Another CPU won the create race; retry as an update.
                if let Some(entry) = AGGREGATED_FLOWS.get_ptr_mut(&key) {
                    accumulate(entry, &pkt, bytes, now);
                } else {
                    increment_counter(FLOW_COUNTER_HASHMAP_DROPPED);
                }
            } else {
                // Table full or per-CPU bucket busy: spill the whole record.
                emit_overflow(&key, &fresh, errno as u8);
            }
        }
    }

    TC_ACT_OK
}

#[inline(always)]
fn accumulate(entry: *mut FlowMetrics, pkt: &PktMeta, bytes: u64, now: u64) {
    unsafe {
        (*entry).packets += 1;
        (*entry).bytes += bytes;
        (*entry).end_mono_ns = now;
        // Repairs the window where a racing create left start unset.
        if (*entry).start_mono_ns == 0 {
            (*entry).start_mono_ns = now;
        }
        (*entry).flags |= pkt.flags;
        (*entry).dscp = pkt.dscp;
    }
}

#[inline(always)]
fn emit_overflow(key: &FlowKey, metrics: &FlowMetrics, errno: u8) {
    let mut record = FlowRecord {
        key: *key,
        metrics: *metrics,
    };
    record.metrics.errno = errno;
    match DIRECT_FLOWS.reserve::<FlowRecord>(0) {
        Some(mut entry) => {
            entry.write(record);
            entry.submit(0);
        }
        None => increment_counter(FLOW_COUNTER_RINGBUF_DROPPED),
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
