#![no_main]

use std::time::{Duration, Instant, SystemTime};

use libfuzzer_sys::fuzz_target;

use domain::flow::deduper::Deduper;
use domain::flow::record::Record;
use ebpf_common::flow::{FlowKey, FlowMetrics};

// Fuzz the first-come deduper: random record streams across random
// interfaces, in all three modes, must never panic and never forward
// more records than they received.
//
// Layout:
//   [0]  = mode (0=drop, 1=mark, 2=merge)
//   rest = consumed in 4-byte chunks as (if_index, src_port, dst_port, direction)
fuzz_target!(|data: &[u8]| {
    if data.len() < 5 {
        return;
    }
    let (just_mark, merge) = match data[0] % 3 {
        0 => (false, false),
        1 => (true, false),
        _ => (false, true),
    };
    let mut deduper = Deduper::new(Duration::from_secs(10), just_mark, merge);
    let now = Instant::now();

    let mut batch = Vec::new();
    for chunk in data[1..].chunks_exact(4) {
        let if_index = u32::from(chunk[0] % 4);
        let mut key = FlowKey::zeroed();
        key.if_index = if_index;
        key.src_port = u16::from(chunk[1]);
        key.dst_port = u16::from(chunk[2]);
        key.direction = chunk[3] % 2;
        key.src_mac = [chunk[0]; 6];
        batch.push(Record::new(
            key,
            FlowMetrics::zeroed(),
            SystemTime::UNIX_EPOCH,
            0,
            format!("iface-{if_index}"),
        ));
    }
    let in_len = batch.len();

    let forwarded = deduper.dedupe_batch(batch, now);
    assert!(forwarded.len() <= in_len);

    // replaying the forwarded stream is stable
    let replay = deduper.dedupe_batch(forwarded, now);
    assert!(replay.len() <= in_len);
});
