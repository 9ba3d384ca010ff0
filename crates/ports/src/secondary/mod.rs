pub mod classifier_port;
pub mod clock_port;
pub mod flow_map_port;
pub mod iface_port;
pub mod metrics_port;
pub mod sink_port;
