#![forbid(unsafe_code)]

pub mod accounter;
pub mod dedupe_stage;
pub mod iface_manager;
pub mod map_tracer;

use std::sync::Arc;

/// Resolves an interface index to its name for record annotation.
///
/// Backed by the interface manager's registry; falls back to a numeric
/// rendering for indexes the agent never saw.
pub type InterfaceNamer = Arc<dyn Fn(u32) -> String + Send + Sync>;

/// Namer used when no registry is available (tests, userspace-only runs).
pub fn index_namer() -> InterfaceNamer {
    Arc::new(|if_index| format!("iface-{if_index}"))
}
