//! Agent configuration: YAML file, environment overrides, validation.
//!
//! Precedence: defaults < config file < environment < CLI flags.
//! Recognized environment names follow the agent's deployment contract
//! (`SAMPLING`, `CACHE_MAX_FLOWS`, …), so the agent can run with no
//! config file at all.

mod common;

pub use common::{ConfigError, parse_bool, parse_cidr, parse_duration, split_csv};

use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use domain::iface::filter::{InterfaceFilter, IpFilter, NameFilter};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{
    DEFAULT_BUFFERS_LENGTH, DEFAULT_CACHE_MAX_FLOWS, DEFAULT_EBPF_PROGRAM_DIR,
};

// ── Logging enums ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

// ── Mode enums ─────────────────────────────────────────────────────

/// Which tc hooks carry the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ingress,
    Egress,
    Both,
}

impl Direction {
    pub fn ingress(self) -> bool {
        matches!(self, Self::Ingress | Self::Both)
    }

    pub fn egress(self) -> bool {
        matches!(self, Self::Egress | Self::Both)
    }
}

/// How interface lifecycle events are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenMode {
    Watch,
    Poll,
}

/// Deduplication strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeduperMode {
    None,
    FirstCome,
}

// ── Sections ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AgentInfo {
    pub log_level: LogLevel,
    pub log_format: LogFormat,
    /// Directory holding the compiled classifier object.
    pub ebpf_program_dir: String,
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
            ebpf_program_dir: DEFAULT_EBPF_PROGRAM_DIR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FlowsConfig {
    /// 0/1 = account every packet, n > 1 = one in n.
    pub sampling: u32,
    /// Kernel flow table capacity, also the accounter cache cap.
    pub cache_max_flows: u32,
    /// Map-tracer eviction period.
    pub cache_active_timeout: String,
    /// Hard eviction window for untouched kernel entries.
    pub stale_entries_evict_timeout: String,
    /// Bound of every inter-stage channel.
    pub buffers_length: usize,
    /// ingress, egress or both.
    pub direction: String,
}

impl Default for FlowsConfig {
    fn default() -> Self {
        Self {
            sampling: 0,
            cache_max_flows: DEFAULT_CACHE_MAX_FLOWS,
            cache_active_timeout: "5s".to_string(),
            stale_entries_evict_timeout: "5s".to_string(),
            buffers_length: DEFAULT_BUFFERS_LENGTH,
            direction: "both".to_string(),
        }
    }
}

impl FlowsConfig {
    pub fn cache_active_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.cache_active_timeout)
    }

    pub fn stale_entries_evict_timeout(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.stale_entries_evict_timeout)
    }

    pub fn direction(&self) -> Result<Direction, ConfigError> {
        match self.direction.to_lowercase().as_str() {
            "ingress" => Ok(Direction::Ingress),
            "egress" => Ok(Direction::Egress),
            "both" => Ok(Direction::Both),
            other => Err(ConfigError::InvalidValue {
                field: "flows.direction".to_string(),
                value: other.to_string(),
                expected: "ingress, egress, both".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct InterfacesConfig {
    /// Interface names to trace; empty = all. `/…/` entries are regexes.
    pub interfaces: Vec<String>,
    /// Interface names to skip.
    pub exclude_interfaces: Vec<String>,
    /// CIDR selector, exclusive with the two name lists.
    pub interface_ips: Vec<String>,
    /// watch (netlink events) or poll.
    pub listen: String,
    pub listen_poll_period: String,
}

impl Default for InterfacesConfig {
    fn default() -> Self {
        Self {
            interfaces: Vec::new(),
            exclude_interfaces: vec!["lo".to_string()],
            interface_ips: Vec::new(),
            listen: "watch".to_string(),
            listen_poll_period: "10s".to_string(),
        }
    }
}

impl InterfacesConfig {
    pub fn listen_mode(&self) -> Result<ListenMode, ConfigError> {
        match self.listen.to_lowercase().as_str() {
            "watch" => Ok(ListenMode::Watch),
            "poll" => Ok(ListenMode::Poll),
            other => Err(ConfigError::InvalidValue {
                field: "interfaces.listen".to_string(),
                value: other.to_string(),
                expected: "watch, poll".to_string(),
            }),
        }
    }

    pub fn listen_poll_period(&self) -> Result<Duration, ConfigError> {
        parse_duration(&self.listen_poll_period)
    }

    /// Build the domain filter; fails on the mutually exclusive forms
    /// and on malformed regexes or CIDRs.
    pub fn filter(&self) -> Result<InterfaceFilter, ConfigError> {
        let default_excludes = Self::default().exclude_interfaces;
        if !self.interface_ips.is_empty() {
            if !self.interfaces.is_empty() || self.exclude_interfaces != default_excludes {
                return Err(ConfigError::Validation {
                    field: "interfaces.interface_ips".to_string(),
                    message: "exclusive with interfaces/exclude_interfaces".to_string(),
                });
            }
            let networks = self
                .interface_ips
                .iter()
                .map(|cidr| parse_cidr(cidr))
                .collect::<Result<Vec<_>, _>>()?;
            return Ok(InterfaceFilter::Ips(IpFilter::new(networks)));
        }
        let names = NameFilter::new(&self.interfaces, &self.exclude_interfaces).map_err(|e| {
            ConfigError::Validation {
                field: "interfaces".to_string(),
                message: e.to_string(),
            }
        })?;
        Ok(InterfaceFilter::Names(names))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DeduperConfig {
    /// none or firstCome.
    pub mode: String,
    /// Idle expiry of first-seen entries; empty = 2 × cache_active_timeout.
    pub fc_expiry: String,
    /// Mark duplicates instead of dropping them.
    pub just_mark: bool,
    /// Merge duplicate observations into the first-seen record.
    pub merge: bool,
}

impl Default for DeduperConfig {
    fn default() -> Self {
        Self {
            mode: "none".to_string(),
            fc_expiry: String::new(),
            just_mark: false,
            merge: false,
        }
    }
}

impl DeduperConfig {
    pub fn mode(&self) -> Result<DeduperMode, ConfigError> {
        match self.mode.as_str() {
            "none" => Ok(DeduperMode::None),
            "firstCome" => Ok(DeduperMode::FirstCome),
            other => Err(ConfigError::InvalidValue {
                field: "deduper.mode".to_string(),
                value: other.to_string(),
                expected: "none, firstCome".to_string(),
            }),
        }
    }

    pub fn fc_expiry(&self, cache_active_timeout: Duration) -> Result<Duration, ConfigError> {
        if self.fc_expiry.is_empty() {
            return Ok(cache_active_timeout * 2);
        }
        parse_duration(&self.fc_expiry)
    }
}

/// Optional sidecar trackers. The core parses the switches; the
/// subsystems themselves ship separately.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TrackersConfig {
    pub enable_rtt: bool,
    pub enable_dns_tracking: bool,
    pub enable_pkt_drops: bool,
    pub enable_pca: bool,
}

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AgentConfig {
    pub agent: AgentInfo,
    pub flows: FlowsConfig,
    pub interfaces: InterfacesConfig,
    pub deduper: DeduperConfig,
    pub trackers: TrackersConfig,
}

impl AgentConfig {
    /// Load from a YAML file, then apply environment overrides and
    /// validate. A missing file is not an error: the agent can be
    /// driven entirely by environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_yaml_ng::from_str(&raw)?
        } else {
            warn!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env_from(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the recognized environment overrides through a lookup
    /// function (injected for tests).
    pub fn apply_env_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse_u32(field: &str, value: &str) -> Result<u32, ConfigError> {
            value.parse().map_err(|_| ConfigError::InvalidValue {
                field: field.to_string(),
                value: value.to_string(),
                expected: "an unsigned integer".to_string(),
            })
        }

        if let Some(v) = lookup("SAMPLING") {
            self.flows.sampling = parse_u32("SAMPLING", &v)?;
        }
        if let Some(v) = lookup("CACHE_MAX_FLOWS") {
            self.flows.cache_max_flows = parse_u32("CACHE_MAX_FLOWS", &v)?;
        }
        if let Some(v) = lookup("CACHE_ACTIVE_TIMEOUT") {
            self.flows.cache_active_timeout = v;
        }
        if let Some(v) = lookup("STALE_ENTRIES_EVICT_TIMEOUT") {
            self.flows.stale_entries_evict_timeout = v;
        }
        if let Some(v) = lookup("BUFFERS_LENGTH") {
            self.flows.buffers_length = parse_u32("BUFFERS_LENGTH", &v)? as usize;
        }
        if let Some(v) = lookup("DIRECTION") {
            self.flows.direction = v;
        }
        if let Some(v) = lookup("INTERFACES") {
            self.interfaces.interfaces = split_csv(&v);
        }
        if let Some(v) = lookup("EXCLUDE_INTERFACES") {
            self.interfaces.exclude_interfaces = split_csv(&v);
        }
        if let Some(v) = lookup("INTERFACE_IPS") {
            self.interfaces.interface_ips = split_csv(&v);
        }
        if let Some(v) = lookup("LISTEN_INTERFACES") {
            self.interfaces.listen = v;
        }
        if let Some(v) = lookup("LISTEN_POLL_PERIOD") {
            self.interfaces.listen_poll_period = v;
        }
        if let Some(v) = lookup("DEDUPER") {
            self.deduper.mode = v;
        }
        if let Some(v) = lookup("DEDUPER_FC_EXPIRY") {
            self.deduper.fc_expiry = v;
        }
        if let Some(v) = lookup("DEDUPER_JUST_MARK") {
            self.deduper.just_mark = parse_bool("DEDUPER_JUST_MARK", &v)?;
        }
        if let Some(v) = lookup("DEDUPER_MERGE") {
            self.deduper.merge = parse_bool("DEDUPER_MERGE", &v)?;
        }
        if let Some(v) = lookup("ENABLE_RTT") {
            self.trackers.enable_rtt = parse_bool("ENABLE_RTT", &v)?;
        }
        if let Some(v) = lookup("ENABLE_DNS_TRACKING") {
            self.trackers.enable_dns_tracking = parse_bool("ENABLE_DNS_TRACKING", &v)?;
        }
        if let Some(v) = lookup("ENABLE_PKT_DROPS") {
            self.trackers.enable_pkt_drops = parse_bool("ENABLE_PKT_DROPS", &v)?;
        }
        if let Some(v) = lookup("ENABLE_PCA") {
            self.trackers.enable_pca = parse_bool("ENABLE_PCA", &v)?;
        }
        Ok(())
    }

    /// Reject configurations the pipeline cannot run with. Fatal at
    /// startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flows.cache_max_flows == 0 {
            return Err(ConfigError::Validation {
                field: "flows.cache_max_flows".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.flows.buffers_length == 0 {
            return Err(ConfigError::Validation {
                field: "flows.buffers_length".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        self.flows.cache_active_timeout()?;
        self.flows.stale_entries_evict_timeout()?;
        self.flows.direction()?;
        self.interfaces.listen_mode()?;
        self.interfaces.listen_poll_period()?;
        self.interfaces.filter()?;
        self.deduper.mode()?;
        self.deduper.fc_expiry(Duration::from_secs(5))?;
        Ok(())
    }
}
