mod counters;
mod flow_map;
mod loader;
mod ring_reader;

pub use counters::GlobalCountersReader;
pub use flow_map::FlowMapAdapter;
pub use loader::{FlowPrograms, TcFlowClassifier};
pub use ring_reader::RingReader;
