//! First-come flow deduplication.
//!
//! A flow crossing two interfaces at once (physical + virtual bridge)
//! shows up as two keys differing only in interface index, MACs and
//! direction. The deduper keeps the variant seen first and suppresses,
//! marks, or merges the rest until the flow goes idle for the expiry
//! window, at which point another interface may take over.
//!
//! Not safe for concurrent access: it runs on the single pipeline thread
//! downstream of eviction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use ebpf_common::flow::FlowKey;

use super::record::{DupEntry, DupList, Record};

struct CacheEntry {
    if_index: u32,
    expiry: Instant,
    dup_list: Option<DupList>,
}

pub struct Deduper {
    expire: Duration,
    /// Marks duplicates instead of dropping them.
    just_mark: bool,
    /// Folds duplicate observations into the first-seen record's dup list.
    merge: bool,
    entries: HashMap<FlowKey, CacheEntry>,
}

impl Deduper {
    pub fn new(expire: Duration, just_mark: bool, merge: bool) -> Self {
        Self {
            expire,
            just_mark,
            merge,
            entries: HashMap::new(),
        }
    }

    /// Process one eviction batch, returning the records to forward.
    pub fn dedupe_batch(&mut self, records: Vec<Record>, now: Instant) -> Vec<Record> {
        self.remove_expired(now);
        let mut fwd = Vec::with_capacity(records.len());
        for record in records {
            self.check_dupe(record, now, &mut fwd);
        }
        fwd
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn check_dupe(&mut self, mut record: Record, now: Instant, fwd: &mut Vec<Record>) {
        let norm = normalized_key(&record.key);
        if let Some(entry) = self.entries.get_mut(&norm) {
            // Whatever interface this came from, activity refreshes the flow.
            entry.expiry = now + self.expire;
            if entry.if_index == record.key.if_index {
                fwd.push(record);
                return;
            }
            // Different interface than the first-seen one: a duplicate.
            if self.merge {
                if let Some(list) = &entry.dup_list {
                    if let Ok(mut list) = list.lock() {
                        list.push(DupEntry {
                            interface: record.interface.clone(),
                            direction: record.key.direction,
                        });
                    }
                }
            }
            if self.just_mark {
                record.duplicate = true;
                fwd.push(record);
            }
            return;
        }

        // First sighting (or expired and forgotten): register and forward.
        let mut entry = CacheEntry {
            if_index: record.key.if_index,
            expiry: now + self.expire,
            dup_list: None,
        };
        if self.merge {
            let list: DupList = Arc::new(Mutex::new(vec![DupEntry {
                interface: record.interface.clone(),
                direction: record.key.direction,
            }]));
            entry.dup_list = Some(Arc::clone(&list));
            record.dup_list = Some(list);
        }
        self.entries.insert(norm, entry);
        fwd.push(record);
    }

    fn remove_expired(&mut self, now: Instant) {
        self.entries.retain(|_, entry| entry.expiry > now);
    }
}

/// Zeroes the fields that differ between observations of the same flow
/// on different interfaces.
fn normalized_key(key: &FlowKey) -> FlowKey {
    let mut norm = *key;
    norm.if_index = 0;
    norm.src_mac = [0; 6];
    norm.dst_mac = [0; 6];
    norm.direction = 0;
    norm
}
