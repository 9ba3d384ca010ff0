use domain::common::error::DomainError;
use domain::flow::record::Record;

/// Secondary port into the external exporter boundary.
///
/// `send_batch` must not block: a full downstream drops the batch (the
/// exporter owns its own buffering).
pub trait RecordSinkPort: Send + Sync {
    fn send_batch(&self, batch: Vec<Record>) -> Result<(), DomainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sink_port_is_object_safe() {
        fn _check(port: &dyn RecordSinkPort) {
            let _ = port.send_batch(Vec::new());
        }
    }
}
