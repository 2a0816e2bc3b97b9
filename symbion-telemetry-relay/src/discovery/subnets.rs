//! Candidate /24 subnets for sink discovery
//!
//! Priority order: operator prefix, last successful subnet, private LAN
//! interface prefixes, fixed hotspot/router prefixes, then any remaining
//! interface prefixes. Duplicates keep their first (highest) position.

use crate::error::SubnetParseError;
use if_addrs::{get_if_addrs, IfAddr};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use tracing::{debug, warn};

/// First three octets of an IPv4 /24
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubnetPrefix([u8; 3]);

impl SubnetPrefix {
    pub const fn new(octets: [u8; 3]) -> Self {
        Self(octets)
    }

    pub fn of(addr: Ipv4Addr) -> Self {
        let [a, b, c, _] = addr.octets();
        Self([a, b, c])
    }

    pub fn host(&self, last: u8) -> Ipv4Addr {
        let [a, b, c] = self.0;
        Ipv4Addr::new(a, b, c, last)
    }

    /// Usable host addresses `.1` through `.254`
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        (1..=254u8).map(move |last| self.host(last))
    }

    /// RFC 1918 ranges, where a LAN display is most likely to live
    pub fn is_private(&self) -> bool {
        self.host(1).is_private()
    }
}

impl fmt::Display for SubnetPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c] = self.0;
        write!(f, "{}.{}.{}", a, b, c)
    }
}

impl FromStr for SubnetPrefix {
    type Err = SubnetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_end_matches('.');
        let octets: Vec<u8> = trimmed
            .split('.')
            .map(|part| part.parse::<u8>())
            .collect::<Result<_, _>>()
            .map_err(|_| SubnetParseError(s.to_string()))?;

        match octets.as_slice() {
            [a, b, c] => Ok(Self([*a, *b, *c])),
            _ => Err(SubnetParseError(s.to_string())),
        }
    }
}

impl TryFrom<String> for SubnetPrefix {
    type Error = SubnetParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SubnetPrefix> for String {
    fn from(prefix: SubnetPrefix) -> Self {
        prefix.to_string()
    }
}

/// Build the ordered, de-duplicated scan list.
pub fn candidate_subnets(
    operator: Option<SubnetPrefix>,
    last_successful: Option<SubnetPrefix>,
    interface_addrs: &[Ipv4Addr],
    priority: &[SubnetPrefix],
) -> Vec<SubnetPrefix> {
    let (lan, other): (Vec<SubnetPrefix>, Vec<SubnetPrefix>) = interface_addrs
        .iter()
        .map(|addr| SubnetPrefix::of(*addr))
        .partition(SubnetPrefix::is_private);

    let ordered = operator
        .into_iter()
        .chain(last_successful)
        .chain(lan)
        .chain(priority.iter().copied())
        .chain(other);

    let mut candidates: Vec<SubnetPrefix> = Vec::new();
    for prefix in ordered {
        if !candidates.contains(&prefix) {
            candidates.push(prefix);
        }
    }
    candidates
}

/// IPv4 addresses of active, non-loopback interfaces, in enumeration order
pub fn local_ipv4_addrs() -> Vec<Ipv4Addr> {
    let interfaces = match get_if_addrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {}", e);
            return Vec::new();
        }
    };

    interfaces
        .into_iter()
        .filter(|iface| !iface.is_loopback())
        .filter_map(|iface| match iface.addr {
            IfAddr::V4(v4) if !v4.ip.is_link_local() => {
                debug!("Found interface: {} ({})", iface.name, v4.ip);
                Some(v4.ip)
            }
            _ => None,
        })
        .collect()
}
