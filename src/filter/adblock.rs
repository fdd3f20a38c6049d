//! Recognizes the sentinel answers ad-blocking resolvers return.

use std::net::IpAddr;

use hickory_proto::op::Message;
use hickory_proto::rr::RData;
use rustc_hash::FxHashSet;

pub const DEFAULT_ADBLOCK_REPLY: [&str; 3] =
    ["0.0.0.0", "::", "fake-for-negative-caching.adguard.com"];

/// Sentinel IPs and authority-section substrings that mark a blocked answer.
#[derive(Debug, Clone)]
pub struct AdBlockJudge {
    ips: FxHashSet<IpAddr>,
    domains: Vec<String>,
}

impl AdBlockJudge {
    /// An empty sentinel list means [`DEFAULT_ADBLOCK_REPLY`].
    pub fn new<S: AsRef<str>>(sentinels: &[S]) -> Self {
        let mut judge = Self {
            ips: FxHashSet::default(),
            domains: Vec::new(),
        };
        if sentinels.is_empty() {
            judge.extend(DEFAULT_ADBLOCK_REPLY);
        } else {
            judge.extend(sentinels.iter().map(|s| s.as_ref()));
        }
        judge
    }

    fn extend<'a>(&mut self, sentinels: impl IntoIterator<Item = &'a str>) {
        for s in sentinels.into_iter().map(str::trim).filter(|s| !s.is_empty()) {
            match s.parse::<IpAddr>() {
                Ok(ip) => {
                    self.ips.insert(ip);
                }
                Err(_) => self.domains.push(s.to_string()),
            }
        }
    }

    /// Judge only the first answer, or the first authority record when there are no answers.
    pub fn is_block_reply(&self, reply: &Message) -> bool {
        if let Some(first) = reply.answers().first() {
            return match first.data() {
                Some(RData::A(a)) => self.ips.contains(&IpAddr::V4(a.0)),
                Some(RData::AAAA(aaaa)) => self.ips.contains(&IpAddr::V6(aaaa.0)),
                _ => false,
            };
        }

        if let Some(first) = reply.name_servers().first() {
            let text = first.to_string();
            return self.domains.iter().any(|d| text.contains(d.as_str()));
        }

        false
    }
}

impl Default for AdBlockJudge {
    fn default() -> Self {
        Self::new::<&str>(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::tests::{a_record, aaaa_record, cname_record, query, reply_with};
    use crate::dns::{empty_no_error, reply_for};
    use hickory_proto::rr::RecordType;
    use hickory_proto::rr::rdata::SOA;
    use hickory_proto::rr::{Name, Record};
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::str::FromStr;

    #[test]
    fn is_block_reply_matches_sentinel_ips() {
        let judge = AdBlockJudge::default();
        let req = query("ads.example.com", RecordType::A);

        let v4 = reply_with(&req, vec![a_record("ads.example.com", Ipv4Addr::UNSPECIFIED)]);
        let v6 = reply_with(&req, vec![aaaa_record("ads.example.com", Ipv6Addr::UNSPECIFIED)]);
        let real = reply_with(&req, vec![a_record("ads.example.com", Ipv4Addr::new(1, 2, 3, 4))]);

        assert!(judge.is_block_reply(&v4));
        assert!(judge.is_block_reply(&v6));
        assert!(!judge.is_block_reply(&real));
    }

    #[test]
    fn is_block_reply_only_looks_at_first_answer() {
        let judge = AdBlockJudge::default();
        let req = query("ads.example.com", RecordType::A);

        let reply = reply_with(
            &req,
            vec![
                cname_record("ads.example.com", "sink.example.net"),
                a_record("sink.example.net", Ipv4Addr::UNSPECIFIED),
            ],
        );

        assert!(!judge.is_block_reply(&reply));
    }

    #[test]
    fn is_block_reply_matches_authority_domain() {
        let judge = AdBlockJudge::default();
        let req = query("ads.example.com", RecordType::A);
        let mut reply = reply_for(&req);
        let soa = SOA::new(
            Name::from_str("fake-for-negative-caching.adguard.com.").unwrap(),
            Name::from_str("hostmaster.ads.example.com.").unwrap(),
            100500,
            1800,
            900,
            604800,
            86400,
        );
        reply.add_name_server(Record::from_rdata(
            Name::from_str("ads.example.com.").unwrap(),
            10,
            RData::SOA(soa),
        ));

        assert!(judge.is_block_reply(&reply));
        assert!(!judge.is_block_reply(&empty_no_error(&req)));
    }

    #[test]
    fn empty_reply_is_not_a_verdict() {
        let judge = AdBlockJudge::default();

        assert!(!judge.is_block_reply(&reply_for(&query("x.com", RecordType::A))));
    }

    #[test]
    fn custom_sentinels_replace_defaults() {
        let judge = AdBlockJudge::new(&["127.0.0.1"]);
        let req = query("ads.example.com", RecordType::A);

        let zero = reply_with(&req, vec![a_record("ads.example.com", Ipv4Addr::UNSPECIFIED)]);
        let local = reply_with(&req, vec![a_record("ads.example.com", Ipv4Addr::LOCALHOST)]);

        assert!(!judge.is_block_reply(&zero));
        assert!(judge.is_block_reply(&local));
    }
}
