//! JSON configuration file.
//!
//! Loaded once at startup and turned into an immutable [`Engine`]. Relative
//! rule and CIDR paths are resolved against the working directory.

use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::DnsCache;
use crate::client::LookupClient;
use crate::engine::{CustomTable, Engine};
use crate::error::ConfigError;
use crate::filter::{AdBlockJudge, AttrTable, parse_attrs};
use crate::resolver::{Bucket, ResolverSet};
use crate::rules::{ChinaCidr, DomainMatcher};

/// A single path or a list of paths.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(s) if s.trim().is_empty() => Vec::new(),
            Self::One(s) => vec![s.clone()],
            Self::Many(v) => v.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(rename = "udp-max-bytes", default = "default_udp_max_bytes")]
    pub udp_max_bytes: u16,

    #[serde(rename = "tcp-only", default)]
    pub tcp_only: bool,

    /// Per-query timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Zero disables the cache.
    #[serde(default)]
    pub cache_expire_sec: u64,

    #[serde(rename = "dns-china", default)]
    pub dns_china: Vec<String>,

    #[serde(rename = "dns-abroad", default)]
    pub dns_abroad: Vec<String>,

    #[serde(rename = "dns-adblock", default)]
    pub dns_adblock: Vec<String>,

    #[serde(rename = "dns-abroad-proxy", default)]
    pub dns_abroad_proxy: Option<String>,

    #[serde(rename = "dns-abroad-attr", default)]
    pub dns_abroad_attr: String,

    #[serde(rename = "dns-adblock-reply", default)]
    pub dns_adblock_reply: Vec<String>,

    #[serde(default)]
    pub domain2ip: BTreeMap<String, String>,

    #[serde(rename = "domain-attr", default)]
    pub domain_attr: BTreeMap<String, String>,

    #[serde(default)]
    pub chn_ip: Vec<String>,

    #[serde(default)]
    pub chn_domain: OneOrMany,

    #[serde(default)]
    pub gfw_domain: OneOrMany,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub matcher_cross_check: bool,
}

fn default_listen() -> String {
    "[::]:53".to_string()
}

fn default_udp_max_bytes() -> u16 {
    4096
}

fn default_timeout() -> u64 {
    2
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Read `path` (relative to `workdir` when given) and resolve the rule and
    /// CIDR file paths it names against `workdir`.
    pub fn load(path: &Path, workdir: Option<&Path>) -> Result<Self, ConfigError> {
        let path = resolve_path(path, workdir);
        let text = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut config: Config = serde_json::from_str(&text)?;

        if let Some(dir) = workdir {
            config.chn_ip = join_all(&config.chn_ip, dir);
            config.chn_domain = OneOrMany::Many(join_all(&config.chn_domain.to_vec(), dir));
            config.gfw_domain = OneOrMany::Many(join_all(&config.gfw_domain.to_vec(), dir));
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| ConfigError::Listen(self.listen.clone()))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout.max(1))
    }

    /// Load rule files and build the engine with a real network client.
    pub fn build_engine(&self) -> Result<Engine, ConfigError> {
        let resolvers = ResolverSet::build(
            &self.dns_china,
            &self.dns_abroad,
            &self.dns_adblock,
            self.dns_abroad_proxy.as_deref(),
        )?;
        let client = LookupClient::new(self.timeout(), &resolvers)?;

        let china_domains = self.load_matcher(&self.chn_domain.to_vec())?;
        let gfw_domains = self.load_matcher(&self.gfw_domain.to_vec())?;
        let china_cidr = ChinaCidr::from_files(&self.chn_ip)?;

        let custom = CustomTable::new(
            self.domain2ip
                .iter()
                .map(|(domain, ips)| (domain.as_str(), ips.as_str())),
        );
        let domain_attrs = AttrTable::new(
            self.domain_attr
                .iter()
                .map(|(domain, attrs)| (domain.as_str(), attrs.as_str())),
        );

        tracing::info!(
            china = resolvers.bucket(Bucket::China).len(),
            abroad = resolvers.bucket(Bucket::Abroad).len(),
            adblock = resolvers.bucket(Bucket::AdBlock).len(),
            custom = custom.len(),
            "resolvers configured"
        );

        Ok(Engine::builder(Arc::new(client), resolvers)
            .china_domains(china_domains)
            .gfw_domains(gfw_domains)
            .china_cidr(china_cidr)
            .custom(custom)
            .abroad_attrs(parse_attrs(&self.dns_abroad_attr))
            .domain_attrs(domain_attrs)
            .adblock(AdBlockJudge::new(&self.dns_adblock_reply))
            .cache(DnsCache::from_secs(self.cache_expire_sec))
            .udp_max_bytes(self.udp_max_bytes)
            .tcp_only(self.tcp_only)
            .build())
    }

    fn load_matcher(&self, paths: &[String]) -> Result<DomainMatcher, ConfigError> {
        let mut matcher = DomainMatcher::new();
        if self.matcher_cross_check {
            matcher = matcher.with_cross_check();
        }
        for path in paths {
            matcher.add_file(Path::new(path))?;
        }
        Ok(matcher)
    }
}

fn resolve_path(path: &Path, workdir: Option<&Path>) -> PathBuf {
    match workdir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path.to_path_buf(),
    }
}

fn join_all(paths: &[String], dir: &Path) -> Vec<String> {
    paths
        .iter()
        .map(|p| resolve_path(Path::new(p), Some(dir)).display().to_string())
        .collect()
}
