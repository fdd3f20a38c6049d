//! China IP range set.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::path::Path;

use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use crate::error::ConfigError;

/// Aggregated, sorted IPv4/IPv6 networks with binary-search lookup.
#[derive(Debug, Default, Clone)]
pub struct ChinaCidr {
    v4: Vec<Ipv4Net>,
    v6: Vec<Ipv6Net>,
}

impl ChinaCidr {
    /// Load every CIDR file; any unparsable line aborts the load.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut v4 = Vec::new();
        let mut v6 = Vec::new();

        for path in paths {
            let path = path.as_ref();
            let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            for (idx, line) in text.lines().enumerate() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                match line.parse::<IpNet>() {
                    Ok(IpNet::V4(net)) => v4.push(net),
                    Ok(IpNet::V6(net)) => v6.push(net),
                    Err(_) => {
                        return Err(ConfigError::Cidr {
                            path: path.to_path_buf(),
                            line: idx + 1,
                            text: line.to_string(),
                        });
                    }
                }
            }
        }

        let set = Self::from_networks(v4, v6);
        tracing::info!(ipv4 = set.v4.len(), ipv6 = set.v6.len(), "loaded china cidr");
        Ok(set)
    }

    pub fn from_networks(v4: Vec<Ipv4Net>, v6: Vec<Ipv6Net>) -> Self {
        Self {
            v4: Ipv4Net::aggregate(&v4),
            v6: Ipv6Net::aggregate(&v6),
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(ip) => contains_v4(&self.v4, ip),
            IpAddr::V6(ip) => match ip.to_ipv4_mapped() {
                Some(mapped) => contains_v4(&self.v4, mapped),
                None => contains_v6(&self.v6, ip),
            },
        }
    }

    pub fn len(&self) -> usize {
        self.v4.len() + self.v6.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn contains_v4(nets: &[Ipv4Net], ip: Ipv4Addr) -> bool {
    let idx = nets.partition_point(|n| n.network() <= ip);
    idx > 0 && nets[idx - 1].contains(&ip)
}

fn contains_v6(nets: &[Ipv6Net], ip: Ipv6Addr) -> bool {
    let idx = nets.partition_point(|n| n.network() <= ip);
    idx > 0 && nets[idx - 1].contains(&ip)
}
