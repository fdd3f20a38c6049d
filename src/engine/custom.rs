//! Static domain-to-address overrides.

use std::net::IpAddr;

use hickory_proto::op::Message;
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record, RecordType};
use rustc_hash::FxHashMap;

use crate::dns::{Question, normalize_domain, reply_for};

const CUSTOM_TTL: u32 = 3600;

/// Exact-domain override table (`domain2ip`).
#[derive(Debug, Default)]
pub struct CustomTable {
    domains: FxHashMap<String, Vec<IpAddr>>,
}

impl CustomTable {
    /// `entries` maps a domain to a `;`-separated IP list. Tokens that are not
    /// IP literals are skipped.
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut domains = FxHashMap::default();
        for (domain, list) in entries {
            let ips: Vec<IpAddr> = list
                .split(';')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .filter_map(|s| match s.parse() {
                    Ok(ip) => Some(ip),
                    Err(_) => {
                        tracing::warn!(domain, ip = s, "domain2ip entry is not an ip");
                        None
                    }
                })
                .collect();
            domains.insert(normalize_domain(domain), ips);
        }
        Self { domains }
    }

    /// Answer `request` from the table, or `None` to fall through to upstream.
    ///
    /// Only A and AAAA questions with at least one address of the matching
    /// family are answered. A lone all-zeros address yields an empty answer.
    pub fn lookup(&self, request: &Message, question: &Question) -> Option<Message> {
        let ips = self.domains.get(&question.name)?;
        let family: Vec<IpAddr> = match question.qtype {
            RecordType::A => ips.iter().filter(|ip| ip.is_ipv4()).copied().collect(),
            RecordType::AAAA => ips.iter().filter(|ip| ip.is_ipv6()).copied().collect(),
            _ => return None,
        };
        if family.is_empty() {
            return None;
        }

        let mut reply = reply_for(request);
        if family.len() == 1 && family[0].is_unspecified() {
            return Some(reply);
        }

        let name = request.queries().first()?.name().clone();
        let answers = family
            .into_iter()
            .map(|ip| {
                let data = match ip {
                    IpAddr::V4(v4) => RData::A(A(v4)),
                    IpAddr::V6(v6) => RData::AAAA(AAAA(v6)),
                };
                Record::from_rdata(name.clone(), CUSTOM_TTL, data)
            })
            .collect();
        reply.insert_answers(answers);
        Some(reply)
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}
