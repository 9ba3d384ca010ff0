//! Byte-exact decoding of overflow ring-buffer frames.
//!
//! The kernel writes `FlowRecord` as a packed little-endian struct; this
//! decoder mirrors that layout field by field so a layout drift on either
//! side fails the vector tests instead of silently mangling records.

use ebpf_common::flow::{FlowKey, FlowMetrics, FlowRecord};

use crate::common::error::DomainError;

/// Size of one ring-buffer frame.
pub const FRAME_LEN: usize = FlowRecord::LEN;

/// A decoded ring-buffer frame, not yet accounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRecord {
    pub key: FlowKey,
    pub metrics: FlowMetrics,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }

    fn u8(&mut self) -> u8 {
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }
}

/// Decode one frame into its key and metrics.
pub fn decode_record(buf: &[u8]) -> Result<RawRecord, DomainError> {
    if buf.len() < FRAME_LEN {
        return Err(DomainError::TruncatedRecord {
            got: buf.len(),
            need: FRAME_LEN,
        });
    }
    let mut c = Cursor { buf, pos: 0 };

    let key = FlowKey {
        eth_protocol: c.u16(),
        direction: c.u8(),
        src_mac: c.take(),
        dst_mac: c.take(),
        src_ip: c.take(),
        dst_ip: c.take(),
        src_port: c.u16(),
        dst_port: c.u16(),
        transport_protocol: c.u8(),
        icmp_type: c.u8(),
        icmp_code: c.u8(),
        if_index: c.u32(),
    };
    let metrics = FlowMetrics {
        packets: c.u32(),
        bytes: c.u64(),
        start_mono_ns: c.u64(),
        end_mono_ns: c.u64(),
        flags: c.u16(),
        dscp: c.u8(),
        errno: c.u8(),
    };
    Ok(RawRecord { key, metrics })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::record::ip_addr;
    use std::net::{IpAddr, Ipv4Addr};

    // Mirrors the packed kernel struct byte for byte.
    #[rustfmt::skip]
    const FRAME: [u8; FRAME_LEN] = [
        0x01, 0x02,                         // eth_protocol
        0x00,                               // direction
        0x04, 0x05, 0x06, 0x07, 0x08, 0x09, // src_mac
        0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f, // dst_mac
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0xff, 0xff, 0x06, 0x07, 0x08, 0x09, // src_ip = ::ffff:6.7.8.9
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
        0x00, 0x00, 0xff, 0xff, 0x0a, 0x0b, 0x0c, 0x0d, // dst_ip = ::ffff:10.11.12.13
        0x0e, 0x0f,                         // src_port
        0x10, 0x11,                         // dst_port
        0x06,                               // transport_protocol
        0x00,                               // icmp_type
        0x00,                               // icmp_code
        0x02, 0x00, 0x00, 0x00,             // if_index
        0x01, 0x00, 0x00, 0x00,             // packets
        0x4a, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // bytes
        0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, // start_mono_ns
        0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1a, // end_mono_ns
        0x12, 0x00,                         // flags
        0x00,                               // dscp
        0x07,                               // errno
    ];

    #[test]
    fn decode_known_frame() {
        let RawRecord { key, metrics } = decode_record(&FRAME).unwrap();

        assert_eq!({ key.eth_protocol }, 0x0201);
        assert_eq!({ key.direction }, 0);
        assert_eq!(key.src_mac, [0x04, 0x05, 0x06, 0x07, 0x08, 0x09]);
        assert_eq!(key.dst_mac, [0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f]);
        assert_eq!({ key.src_port }, 0x0f0e);
        assert_eq!({ key.dst_port }, 0x1110);
        assert_eq!({ key.transport_protocol }, 6);
        assert_eq!({ key.if_index }, 2);

        assert_eq!({ metrics.packets }, 1);
        assert_eq!({ metrics.bytes }, 74);
        assert_eq!({ metrics.start_mono_ns }, 0x1a19_1817_1615_1413);
        assert_eq!({ metrics.end_mono_ns }, 0x1a19_1817_1615_1413);
        assert_eq!({ metrics.flags }, 0x12);
        assert_eq!({ metrics.errno }, 7);
    }

    #[test]
    fn decode_recovers_ipv4_mapped_addresses() {
        let key = decode_record(&FRAME).unwrap().key;
        assert_eq!(ip_addr(&key.src_ip), IpAddr::V4(Ipv4Addr::new(6, 7, 8, 9)));
        assert_eq!(
            ip_addr(&key.dst_ip),
            IpAddr::V4(Ipv4Addr::new(10, 11, 12, 13))
        );
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let err = decode_record(&FRAME[..FRAME_LEN - 1]).unwrap_err();
        assert!(matches!(
            err,
            DomainError::TruncatedRecord { got, need } if got == FRAME_LEN - 1 && need == FRAME_LEN
        ));
    }

    #[test]
    fn oversized_buffer_decodes_prefix() {
        let mut buf = FRAME.to_vec();
        buf.extend_from_slice(&[0xde, 0xad]);
        assert!(decode_record(&buf).is_ok());
    }
}
