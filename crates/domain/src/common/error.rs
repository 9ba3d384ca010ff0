use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("truncated record: got {got} bytes, need {need}")]
    TruncatedRecord { got: usize, need: usize },

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("map error: {0}")]
    MapError(String),

    #[error("sink error: {0}")]
    SinkError(String),

    #[error("netlink error: {0}")]
    NetlinkError(String),

    #[error("attach error: {0}")]
    AttachError(String),
}
