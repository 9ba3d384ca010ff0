//! Allow/deny filtering of network interfaces.
//!
//! Two exclusive forms: matching on interface names (exact strings or
//! `/regex/` entries), or selecting interfaces whose assigned addresses
//! intersect a CIDR list.

use std::net::IpAddr;

use regex::Regex;

use crate::common::error::DomainError;

use super::entity::IpNetwork;

/// A single allow/deny entry: `/…/` delimits a regular expression,
/// anything else matches case-sensitively as a whole name.
#[derive(Debug, Clone)]
enum MatchRule {
    Exact(String),
    Pattern(Regex),
}

impl MatchRule {
    fn parse(entry: &str) -> Result<Self, DomainError> {
        let trimmed = entry.trim();
        if let Some(inner) = trimmed
            .strip_prefix('/')
            .and_then(|rest| rest.strip_suffix('/'))
        {
            let re = Regex::new(inner).map_err(|e| {
                DomainError::InvalidFilter(format!("invalid regex '{inner}': {e}"))
            })?;
            Ok(Self::Pattern(re))
        } else {
            Ok(Self::Exact(trimmed.to_string()))
        }
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(s) => s == name,
            Self::Pattern(re) => re.is_match(name),
        }
    }
}

/// Name-based interface filter.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    allowed: Vec<MatchRule>,
    excluded: Vec<MatchRule>,
}

impl NameFilter {
    /// Build from the configured allow and exclude lists. An empty allow
    /// list admits every interface not excluded.
    pub fn new(allowed: &[String], excluded: &[String]) -> Result<Self, DomainError> {
        Ok(Self {
            allowed: allowed
                .iter()
                .map(|e| MatchRule::parse(e))
                .collect::<Result<_, _>>()?,
            excluded: excluded
                .iter()
                .map(|e| MatchRule::parse(e))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn allowed(&self, name: &str) -> bool {
        if self.excluded.iter().any(|r| r.matches(name)) {
            return false;
        }
        if self.allowed.is_empty() {
            return true;
        }
        self.allowed.iter().any(|r| r.matches(name))
    }
}

/// Address-based interface selector: an interface passes when any of its
/// assigned addresses falls inside any of the configured networks.
#[derive(Debug, Clone, Default)]
pub struct IpFilter {
    networks: Vec<IpNetwork>,
}

impl IpFilter {
    pub fn new(networks: Vec<IpNetwork>) -> Self {
        Self { networks }
    }

    pub fn allowed(&self, addrs: &[IpAddr]) -> bool {
        addrs
            .iter()
            .any(|a| self.networks.iter().any(|n| n.contains(*a)))
    }
}

/// The configured filtering mode.
#[derive(Debug, Clone)]
pub enum InterfaceFilter {
    Names(NameFilter),
    Ips(IpFilter),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn empty_allow_list_admits_all_but_excluded() {
        let f = NameFilter::new(&[], &strings(&["lo"])).unwrap();
        assert!(f.allowed("eth0"));
        assert!(f.allowed("br-ex"));
        assert!(!f.allowed("lo"));
    }

    #[test]
    fn allow_list_is_exact() {
        let f = NameFilter::new(&strings(&["eth0"]), &[]).unwrap();
        assert!(f.allowed("eth0"));
        assert!(!f.allowed("eth1"));
        assert!(!f.allowed("eth01"));
    }

    #[test]
    fn regex_entries_are_slash_delimited() {
        let f = NameFilter::new(&strings(&["/^veth/"]), &[]).unwrap();
        assert!(f.allowed("veth1234"));
        assert!(!f.allowed("eth0"));
    }

    #[test]
    fn exclusion_wins_over_allowance() {
        let f = NameFilter::new(&strings(&["/^eth/"]), &strings(&["eth1"])).unwrap();
        assert!(f.allowed("eth0"));
        assert!(!f.allowed("eth1"));
    }

    #[test]
    fn regex_exclusion() {
        let f = NameFilter::new(&[], &strings(&["/^br-/"])).unwrap();
        assert!(!f.allowed("br-1a2b3c"));
        assert!(f.allowed("bridge0"));
    }

    #[test]
    fn invalid_regex_is_rejected() {
        assert!(NameFilter::new(&strings(&["/([/"]), &[]).is_err());
    }

    #[test]
    fn ip_filter_matches_any_assigned_address() {
        let f = IpFilter::new(vec![IpNetwork::V4 {
            addr: 0xC0A8_0100, // 192.168.1.0/24
            prefix_len: 24,
        }]);
        let addrs = [
            "10.0.0.7".parse().unwrap(),
            "192.168.1.42".parse().unwrap(),
        ];
        assert!(f.allowed(&addrs));
        assert!(!f.allowed(&["10.0.0.7".parse().unwrap()]));
        assert!(!f.allowed(&[]));
    }
}
