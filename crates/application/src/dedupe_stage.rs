//! Pipeline stage between eviction and the exporter boundary.
//!
//! Runs the first-come deduplication engine over every batch when
//! enabled, then hands the survivors to the record sink. With the
//! deduper off it degrades to a plain forwarder.

use std::sync::Arc;
use std::time::Instant;

use domain::flow::deduper::Deduper;
use domain::flow::record::Record;
use ports::secondary::sink_port::RecordSinkPort;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct DedupeStage {
    deduper: Option<Deduper>,
    sink: Arc<dyn RecordSinkPort>,
}

impl DedupeStage {
    pub fn new(deduper: Option<Deduper>, sink: Arc<dyn RecordSinkPort>) -> Self {
        Self { deduper, sink }
    }

    /// Stage loop: exits when the input closes or `cancel` fires, after
    /// draining whatever is already queued.
    pub async fn run(mut self, mut input: mpsc::Receiver<Vec<Record>>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    while let Ok(batch) = input.try_recv() {
                        self.process(batch);
                    }
                    break;
                }
                batch = input.recv() => match batch {
                    Some(batch) => self.process(batch),
                    None => break,
                },
            }
        }
        debug!("dedupe stage stopped");
    }

    fn process(&mut self, batch: Vec<Record>) {
        let batch = match &mut self.deduper {
            Some(deduper) => deduper.dedupe_batch(batch, Instant::now()),
            None => batch,
        };
        if batch.is_empty() {
            return;
        }
        if let Err(e) = self.sink.send_batch(batch) {
            warn!(error = %e, "record sink rejected batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebpf_common::flow::{FlowKey, FlowMetrics};
    use ports::test_utils::CollectingSink;
    use std::time::{Duration, SystemTime};

    fn record(if_index: u32, iface: &str) -> Record {
        let mut key = FlowKey::zeroed();
        key.src_port = 1234;
        key.dst_port = 80;
        key.transport_protocol = 6;
        key.if_index = if_index;
        Record::new(
            key,
            FlowMetrics::zeroed(),
            SystemTime::UNIX_EPOCH,
            0,
            iface.to_string(),
        )
    }

    #[tokio::test]
    async fn passthrough_without_deduper() {
        let sink = Arc::new(CollectingSink::default());
        let stage = DedupeStage::new(None, Arc::clone(&sink) as Arc<dyn RecordSinkPort>);
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        tx.send(vec![record(1, "eth0"), record(2, "br0")])
            .await
            .unwrap();
        drop(tx);
        stage.run(rx, cancel).await;

        assert_eq!(sink.records().len(), 2);
    }

    #[tokio::test]
    async fn first_come_deduplication_applies() {
        let sink = Arc::new(CollectingSink::default());
        let deduper = Deduper::new(Duration::from_secs(10), false, false);
        let stage = DedupeStage::new(Some(deduper), Arc::clone(&sink) as Arc<dyn RecordSinkPort>);
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        tx.send(vec![record(1, "eth0"), record(2, "br0")])
            .await
            .unwrap();
        drop(tx);
        stage.run(rx, cancel).await;

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].interface, "eth0");
    }

    #[tokio::test]
    async fn cancellation_drains_queued_batches() {
        let sink = Arc::new(CollectingSink::default());
        let stage = DedupeStage::new(None, Arc::clone(&sink) as Arc<dyn RecordSinkPort>);
        let (tx, rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        tx.send(vec![record(1, "eth0")]).await.unwrap();
        cancel.cancel();
        stage.run(rx, cancel).await;

        assert_eq!(sink.records().len(), 1);
    }
}
