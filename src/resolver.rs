//! Upstream resolver registry.
//!
//! Resolver spec strings look like `udp,tcp@8.8.8.8:53`, `doh@https://dns.google/dns-query`
//! or a bare address. Resolvers are parsed once at startup and shared read-only.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::ConfigError;

const DEFAULT_PORT: u16 = 53;

/// Transport used for one step of a resolver's protocol chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Udp,
    Tcp,
    Doh,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Udp => "udp",
            Protocol::Tcp => "tcp",
            Protocol::Doh => "doh",
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "udp" => Ok(Protocol::Udp),
            "tcp" => Ok(Protocol::Tcp),
            "doh" | "https" => Ok(Protocol::Doh),
            other => Err(format!("unsupported protocol {other:?}")),
        }
    }
}

/// Trust bucket a resolver belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    China,
    Abroad,
    AdBlock,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Bucket::China => "china",
            Bucket::Abroad => "abroad",
            Bucket::AdBlock => "adblock",
        }
    }
}

/// SOCKS5 relay address (`host:port`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub addr: String,
}

impl Proxy {
    /// Parse `socks5://host:port`; every other scheme is rejected.
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let (scheme, addr) = spec
            .trim()
            .split_once("://")
            .ok_or_else(|| ConfigError::Proxy(spec.to_string()))?;
        if !scheme.eq_ignore_ascii_case("socks5") || addr.is_empty() {
            return Err(ConfigError::Proxy(spec.to_string()));
        }
        Ok(Self {
            addr: addr.to_string(),
        })
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socks5://{}", self.addr)
    }
}

/// One upstream DNS server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolver {
    addr: String,
    protocols: Vec<Protocol>,
    bucket: Bucket,
    proxy: Option<Proxy>,
}

impl Resolver {
    /// Parse a resolver spec string into `bucket`.
    pub fn parse(spec: &str, bucket: Bucket) -> Result<Self, ConfigError> {
        let spec = spec.trim();
        let invalid = |reason: &str| ConfigError::Resolver {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let (protocols, addr) = match spec.split_once('@') {
            Some((chain, addr)) if !chain.contains("://") => {
                let protocols = chain
                    .split(',')
                    .map(|p| p.parse::<Protocol>())
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| invalid(&e))?;
                (protocols, addr.trim())
            }
            _ if is_doh_url(spec) => (vec![Protocol::Doh], spec),
            _ => (vec![Protocol::Udp, Protocol::Tcp], spec),
        };

        if addr.is_empty() {
            return Err(invalid("empty address"));
        }
        if !addr.is_ascii() {
            return Err(invalid("address must be ascii"));
        }
        if protocols.is_empty() {
            return Err(invalid("empty protocol chain"));
        }

        let doh = protocols.contains(&Protocol::Doh);
        let plain = protocols.iter().any(|p| *p != Protocol::Doh);
        let addr = match (doh, plain, is_doh_url(addr)) {
            (true, false, true) => addr.to_string(),
            (true, false, false) => return Err(invalid("doh requires an https:// url")),
            (false, true, false) => with_default_port(addr),
            (false, true, true) => return Err(invalid("udp/tcp require a host:port address")),
            _ => return Err(invalid("doh cannot share a chain with udp/tcp")),
        };

        Ok(Self {
            addr,
            protocols,
            bucket,
            proxy: None,
        })
    }

    pub fn with_proxy(mut self, proxy: Option<Proxy>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn protocols(&self) -> &[Protocol] {
        &self.protocols
    }

    pub fn bucket(&self) -> Bucket {
        self.bucket
    }

    pub fn proxy(&self) -> Option<&Proxy> {
        self.proxy.as_ref()
    }
}

impl fmt::Display for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let chain: Vec<_> = self.protocols.iter().map(|p| p.as_str()).collect();
        write!(f, "{}@{}", chain.join(","), self.addr)
    }
}

fn is_doh_url(addr: &str) -> bool {
    addr.len() > 8 && addr.get(..8).is_some_and(|p| p.eq_ignore_ascii_case("https://"))
}

fn with_default_port(addr: &str) -> String {
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_string();
    }
    if let Ok(ip) = addr.trim_matches(|c| c == '[' || c == ']').parse::<IpAddr>() {
        return SocketAddr::new(ip, DEFAULT_PORT).to_string();
    }
    if addr
        .rsplit_once(':')
        .is_some_and(|(_, port)| port.parse::<u16>().is_ok())
    {
        return addr.to_string();
    }
    format!("{addr}:{DEFAULT_PORT}")
}

/// All configured resolvers, grouped by bucket and deduplicated by address.
#[derive(Debug, Default, Clone)]
pub struct ResolverSet {
    china: Vec<Arc<Resolver>>,
    abroad: Vec<Arc<Resolver>>,
    adblock: Vec<Arc<Resolver>>,
}

impl ResolverSet {
    pub fn build(
        china: &[String],
        abroad: &[String],
        adblock: &[String],
        abroad_proxy: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let proxy = abroad_proxy
            .filter(|p| !p.trim().is_empty())
            .map(Proxy::parse)
            .transpose()?;

        let mut set = Self::default();
        for spec in china {
            set.push(Resolver::parse(spec, Bucket::China)?);
        }
        for spec in abroad {
            set.push(Resolver::parse(spec, Bucket::Abroad)?.with_proxy(proxy.clone()));
        }
        for spec in adblock {
            set.push(Resolver::parse(spec, Bucket::AdBlock)?);
        }
        Ok(set)
    }

    /// Add a resolver unless its bucket already has one with the same address.
    pub fn push(&mut self, resolver: Resolver) {
        let list = match resolver.bucket {
            Bucket::China => &mut self.china,
            Bucket::Abroad => &mut self.abroad,
            Bucket::AdBlock => &mut self.adblock,
        };
        if list.iter().any(|r| r.addr == resolver.addr) {
            return;
        }
        list.push(Arc::new(resolver));
    }

    pub fn bucket(&self, bucket: Bucket) -> &[Arc<Resolver>] {
        match bucket {
            Bucket::China => &self.china,
            Bucket::Abroad => &self.abroad,
            Bucket::AdBlock => &self.adblock,
        }
    }
}
