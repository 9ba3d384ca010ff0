use std::time::Duration;

// ── Paths ──────────────────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/flowlens/config.yaml";

/// Default directory containing the compiled classifier object.
pub const DEFAULT_EBPF_PROGRAM_DIR: &str = "/usr/local/lib/flowlens";

/// Fall-back for local development (relative to the workspace root).
pub const DEFAULT_EBPF_PROGRAM_DIR_DEV: &str = "target/bpfel-unknown-none/release";

/// File name of the classifier object inside the program directory.
pub const FLOW_PROGRAM_OBJECT: &str = "tc-flows";

// ── Pipeline defaults ──────────────────────────────────────────────

pub const DEFAULT_SAMPLING: u32 = 0;
pub const DEFAULT_CACHE_MAX_FLOWS: u32 = 5000;
pub const DEFAULT_CACHE_ACTIVE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_STALE_ENTRIES_EVICT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BUFFERS_LENGTH: usize = 50;
pub const DEFAULT_LISTEN_POLL_PERIOD: Duration = Duration::from_secs(10);

// ── Timeouts ───────────────────────────────────────────────────────

pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
