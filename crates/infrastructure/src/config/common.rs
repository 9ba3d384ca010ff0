//! Shared parsing helpers and the config error type.

use std::time::Duration;

use domain::iface::entity::IpNetwork;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    #[error("invalid CIDR notation '{value}': {reason}")]
    InvalidCidr { value: String, reason: String },

    #[error("invalid value '{value}' for field '{field}': expected one of {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

// ── Parsing helpers ────────────────────────────────────────────────

/// Parse a duration string: an integer with an `ms`, `s`, `m` or `h`
/// suffix. A bare integer means seconds.
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let value = s.trim();
    let invalid = |reason: &str| ConfigError::InvalidDuration {
        value: value.to_string(),
        reason: reason.to_string(),
    };
    if value.is_empty() {
        return Err(invalid("empty string"));
    }
    let (digits, scale_ms) = if let Some(d) = value.strip_suffix("ms") {
        (d, 1u64)
    } else if let Some(d) = value.strip_suffix('s') {
        (d, 1_000)
    } else if let Some(d) = value.strip_suffix('m') {
        (d, 60_000)
    } else if let Some(d) = value.strip_suffix('h') {
        (d, 3_600_000)
    } else {
        (value, 1_000)
    };
    let amount: u64 = digits
        .parse()
        .map_err(|_| invalid("expected an integer amount"))?;
    Ok(Duration::from_millis(amount * scale_ms))
}

/// Parse a CIDR string into an `IpNetwork`. Supports both IPv4
/// (`"192.168.1.0/24"`, `"10.0.0.1"`) and IPv6 (`"2001:db8::/32"`).
pub fn parse_cidr(s: &str) -> Result<IpNetwork, ConfigError> {
    if s.contains(':') {
        parse_cidr_v6(s)
    } else {
        parse_cidr_v4(s)
    }
}

fn parse_cidr_v4(s: &str) -> Result<IpNetwork, ConfigError> {
    let (ip_str, prefix_len) = match s.split_once('/') {
        Some((ip, prefix)) => {
            let len = prefix.parse::<u8>().map_err(|_| ConfigError::InvalidCidr {
                value: s.to_string(),
                reason: format!("invalid prefix length: '{prefix}'"),
            })?;
            if len > 32 {
                return Err(ConfigError::InvalidCidr {
                    value: s.to_string(),
                    reason: format!("prefix length {len} must be 0-32"),
                });
            }
            (ip, len)
        }
        None => (s, 32),
    };

    let addr: std::net::Ipv4Addr = ip_str.parse().map_err(|e| ConfigError::InvalidCidr {
        value: s.to_string(),
        reason: format!("invalid IPv4 address: {e}"),
    })?;

    Ok(IpNetwork::V4 {
        addr: u32::from(addr),
        prefix_len,
    })
}

fn parse_cidr_v6(s: &str) -> Result<IpNetwork, ConfigError> {
    let (ip_str, prefix_len) = match s.split_once('/') {
        Some((ip, prefix)) => {
            let len = prefix.parse::<u8>().map_err(|_| ConfigError::InvalidCidr {
                value: s.to_string(),
                reason: format!("invalid prefix length: '{prefix}'"),
            })?;
            if len > 128 {
                return Err(ConfigError::InvalidCidr {
                    value: s.to_string(),
                    reason: format!("prefix length {len} must be 0-128"),
                });
            }
            (ip, len)
        }
        None => (s, 128),
    };

    let addr: std::net::Ipv6Addr = ip_str.parse().map_err(|e| ConfigError::InvalidCidr {
        value: s.to_string(),
        reason: format!("invalid IPv6 address: {e}"),
    })?;

    Ok(IpNetwork::V6 {
        addr: addr.octets(),
        prefix_len,
    })
}

/// Parse a boolean environment value.
pub fn parse_bool(field: &str, s: &str) -> Result<bool, ConfigError> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: s.to_string(),
            expected: "true, false".to_string(),
        }),
    }
}

/// Split a comma-separated list, dropping empty items.
pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_suffixes() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn bare_integer_means_seconds() {
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));
    }

    #[test]
    fn invalid_durations_rejected() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("1.5s").is_err());
    }

    #[test]
    fn parse_cidr_v4_with_prefix() {
        let net = parse_cidr("192.168.1.0/24").unwrap();
        assert!(matches!(
            net,
            IpNetwork::V4 {
                addr: 0xC0A8_0100,
                prefix_len: 24
            }
        ));
    }

    #[test]
    fn parse_cidr_v4_single_host() {
        let net = parse_cidr("10.0.0.1").unwrap();
        assert!(matches!(
            net,
            IpNetwork::V4 {
                addr: 0x0A00_0001,
                prefix_len: 32
            }
        ));
    }

    #[test]
    fn parse_cidr_v4_invalid() {
        assert!(parse_cidr("10.0.0.0/33").is_err());
        assert!(parse_cidr("256.0.0.0/24").is_err());
        assert!(parse_cidr("not-an-ip").is_err());
    }

    #[test]
    fn parse_cidr_v6_with_prefix() {
        let net = parse_cidr("2001:db8::/32").unwrap();
        match net {
            IpNetwork::V6 { addr, prefix_len } => {
                assert_eq!(prefix_len, 32);
                assert_eq!(&addr[..4], &[0x20, 0x01, 0x0d, 0xb8]);
            }
            IpNetwork::V4 { .. } => panic!("expected V6"),
        }
    }

    #[test]
    fn parse_cidr_v6_invalid_prefix() {
        assert!(parse_cidr("::1/129").is_err());
    }

    #[test]
    fn bool_values() {
        assert!(parse_bool("x", "true").unwrap());
        assert!(parse_bool("x", "1").unwrap());
        assert!(!parse_bool("x", "false").unwrap());
        assert!(parse_bool("x", "maybe").is_err());
    }

    #[test]
    fn csv_splitting() {
        assert_eq!(split_csv("eth0, lo ,br0"), vec!["eth0", "lo", "br0"]);
        assert!(split_csv("").is_empty());
        assert_eq!(split_csv("a,,b"), vec!["a", "b"]);
    }
}
