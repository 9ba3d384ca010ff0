mod channel_sink;

pub use channel_sink::{drain_boundary, ChannelSink};
