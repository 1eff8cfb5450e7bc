// ABOUTME: Destination IP deny-list used by the fetch layer to block SSRF targets.
// ABOUTME: Rules are CIDR ranges or single IPs; an empty list disables the check.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use ipnet::IpNet;

/// Private, loopback and link-local ranges.
const PRIVATE_RANGES: &[&str] = &[
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "0.0.0.0/8",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
];

/// An ordered list of denied networks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DenyList {
    rules: Vec<IpNet>,
}

impl DenyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ranges a public-facing service should never reach.
    pub fn private_networks() -> Self {
        let rules = PRIVATE_RANGES
            .iter()
            .filter_map(|r| r.parse::<IpNet>().ok())
            .collect();
        Self { rules }
    }

    /// Parse rules from strings. A bare address becomes a single-host network.
    pub fn parse<I, S>(rules: I) -> Result<Self, anyhow::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut list = Self::new();
        for rule in rules {
            list.push(rule.as_ref().parse()?);
        }
        Ok(list)
    }

    pub fn push(&mut self, rule: DenyRule) {
        self.rules.push(rule.0);
    }

    /// Returns the first rule that contains `ip`.
    pub fn matching_rule(&self, ip: &IpAddr) -> Option<&IpNet> {
        self.rules.iter().find(|net| net.contains(ip))
    }

    pub fn is_denied(&self, ip: &IpAddr) -> bool {
        self.matching_rule(ip).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

/// One deny-list entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DenyRule(IpNet);

impl FromStr for DenyRule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(net) = s.parse::<IpNet>() {
            return Ok(Self(net));
        }
        let ip = s
            .parse::<IpAddr>()
            .map_err(|_| anyhow::anyhow!("invalid IP or CIDR rule: {:?}", s))?;
        Ok(Self(IpNet::from(ip)))
    }
}

impl fmt::Display for DenyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
