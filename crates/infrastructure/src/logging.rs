use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LogFormat, LogLevel};

/// Default filter directives for the agent.
///
/// The configured level applies to the flowlens crates; the netlink and
/// eBPF dependency crates get a `warn` floor so a `debug` run shows the
/// pipeline, not the wire chatter of every link dump and map syscall.
fn default_directives(level: LogLevel) -> String {
    format!(
        "{},aya=warn,netlink_proto=warn,netlink_sys=warn,rtnetlink=warn",
        level.as_str()
    )
}

/// Initialize logging to stdout. Call once, before any task spawns.
///
/// `RUST_LOG` overrides the configured directives entirely. Formats:
/// - `LogFormat::Json`: one flattened object per line, for the log
///   shipper running next to the agent.
/// - `LogFormat::Text`: compact single-line output for interactive runs.
pub fn init_logging(level: LogLevel, format: LogFormat) -> Result<(), ConfigError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(level)));

    let registry = tracing_subscriber::registry().with(env_filter);

    match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_ansi(false),
            )
            .init(),
        LogFormat::Text => registry
            .with(fmt::layer().compact().with_target(true))
            .init(),
    }

    Ok(())
}
