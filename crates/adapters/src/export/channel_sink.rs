use std::sync::Arc;

use domain::common::error::DomainError;
use domain::flow::record::Record;
use ports::secondary::metrics_port::{MetricsPort, drop_reason};
use ports::secondary::sink_port::RecordSinkPort;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Typed bounded channel into the external exporter boundary.
///
/// A full channel means the exporter is not keeping up; the batch is
/// dropped and counted, never blocked on. The exporter owns any further
/// buffering.
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<Record>>,
    metrics: Arc<dyn MetricsPort>,
}

impl ChannelSink {
    pub fn new(capacity: usize, metrics: Arc<dyn MetricsPort>) -> (Self, mpsc::Receiver<Vec<Record>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, metrics }, rx)
    }
}

impl RecordSinkPort for ChannelSink {
    fn send_batch(&self, batch: Vec<Record>) -> Result<(), DomainError> {
        match self.tx.try_send(batch) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(batch)) => {
                self.metrics.batch_dropped(drop_reason::EXPORT_FULL);
                warn!(count = batch.len(), "exporter channel full, dropping batch");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(DomainError::SinkError("exporter channel closed".into()))
            }
        }
    }
}

/// Terminal consumer used until an exporter is wired in: drains the
/// boundary channel and reports batch sizes at debug level.
pub async fn drain_boundary(mut rx: mpsc::Receiver<Vec<Record>>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            batch = rx.recv() => match batch {
                Some(batch) => debug!(count = batch.len(), "flow batch reached exporter boundary"),
                None => break,
            },
        }
    }
}
