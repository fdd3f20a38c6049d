//! Record-stripping policies applied to upstream replies.

use std::fmt;
use std::str::FromStr;

use hickory_proto::rr::rdata::HTTPS;
use hickory_proto::rr::rdata::svcb::{SVCB, SvcParamKey};
use hickory_proto::rr::{RData, Record, RecordType};
use rustc_hash::FxHashMap;

use crate::client::LookupResult;
use crate::dns::{empty_no_error, is_synthetic_empty, normalize_domain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainAttr {
    NoCname,
    NoIpv4,
    NoIpv6,
    NoHttps,
}

impl DomainAttr {
    pub fn as_str(self) -> &'static str {
        match self {
            DomainAttr::NoCname => "nocname",
            DomainAttr::NoIpv4 => "noipv4",
            DomainAttr::NoIpv6 => "noipv6",
            DomainAttr::NoHttps => "nohttps",
        }
    }

    /// Record type this attribute deletes from the answer section.
    fn record_type(self) -> RecordType {
        match self {
            DomainAttr::NoCname => RecordType::CNAME,
            DomainAttr::NoIpv4 => RecordType::A,
            DomainAttr::NoIpv6 => RecordType::AAAA,
            DomainAttr::NoHttps => RecordType::HTTPS,
        }
    }
}

impl FromStr for DomainAttr {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nocname" => Ok(DomainAttr::NoCname),
            "noipv4" => Ok(DomainAttr::NoIpv4),
            "noipv6" => Ok(DomainAttr::NoIpv6),
            "nohttps" => Ok(DomainAttr::NoHttps),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DomainAttr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a `;`-separated attribute list. Unknown tokens are skipped with a warning.
pub fn parse_attrs(list: &str) -> Vec<DomainAttr> {
    let mut attrs = Vec::new();
    for token in list.split(';').map(str::trim).filter(|t| !t.is_empty()) {
        match token.parse::<DomainAttr>() {
            Ok(attr) if !attrs.contains(&attr) => attrs.push(attr),
            Ok(_) => {}
            Err(()) => tracing::warn!(attr = token, "unknown domain attr ignored"),
        }
    }
    attrs
}

/// Per-domain attributes, matched by suffix.
#[derive(Debug, Default)]
pub struct AttrTable {
    domains: FxHashMap<String, Vec<DomainAttr>>,
}

impl AttrTable {
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut domains: FxHashMap<String, Vec<DomainAttr>> = FxHashMap::default();
        for (domain, list) in entries {
            let attrs = domains.entry(normalize_domain(domain)).or_default();
            for attr in parse_attrs(list) {
                if !attrs.contains(&attr) {
                    attrs.push(attr);
                }
            }
        }
        Self { domains }
    }

    /// Union of the attributes of every rule `domain` falls under.
    pub fn lookup(&self, domain: &str) -> Vec<DomainAttr> {
        let mut attrs = Vec::new();
        if self.domains.is_empty() {
            return attrs;
        }

        let domain = normalize_domain(domain);
        let mut current = domain.as_str();
        loop {
            if let Some(found) = self.domains.get(current) {
                for attr in found {
                    if !attrs.contains(attr) {
                        attrs.push(*attr);
                    }
                }
            }
            match current.find('.') {
                Some(pos) => current = &current[pos + 1..],
                None => return attrs,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

/// Apply `attrs` to `result` in place. Returns whether the reply changed.
///
/// An AAAA question under `noipv6` is answered with the synthetic empty reply.
/// Applying the same attributes twice changes nothing the second time.
pub fn filter_by_attrs(result: &mut LookupResult, attrs: &[DomainAttr]) -> bool {
    if attrs.is_empty() {
        return false;
    }
    let reply = &mut result.reply;

    let is_aaaa = reply
        .queries()
        .first()
        .is_some_and(|q| q.query_type() == RecordType::AAAA);
    if is_aaaa && attrs.contains(&DomainAttr::NoIpv6) {
        if is_synthetic_empty(reply) {
            return false;
        }
        *reply = empty_no_error(reply);
        return true;
    }

    let answers = reply.take_answers();
    let before = answers.len();
    let mut kept: Vec<Record> = answers
        .into_iter()
        .filter(|rr| !attrs.iter().any(|a| a.record_type() == rr.record_type()))
        .collect();
    let mut changed = kept.len() != before;

    if attrs.contains(&DomainAttr::NoIpv6) {
        for rr in kept.iter_mut() {
            if strip_ipv6_hints(rr) {
                changed = true;
            }
        }
    }
    reply.insert_answers(kept);
    changed
}

fn strip_ipv6_hints(rr: &mut Record) -> bool {
    let Some(RData::HTTPS(HTTPS(svcb))) = rr.data() else {
        return false;
    };
    let params = svcb.svc_params();
    if !params.iter().any(|(key, _)| *key == SvcParamKey::Ipv6Hint) {
        return false;
    }

    let params = params
        .iter()
        .filter(|(key, _)| *key != SvcParamKey::Ipv6Hint)
        .cloned()
        .collect();
    let stripped = SVCB::new(svcb.svc_priority(), svcb.target_name().clone(), params);
    rr.set_data(Some(RData::HTTPS(HTTPS(stripped))));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::tests::{a_record, aaaa_record, cname_record, query, reply_with};
    use hickory_proto::rr::Name;
    use hickory_proto::rr::rdata::svcb::{IpHint, SvcParamValue};
    use hickory_proto::rr::rdata::{A, AAAA};
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::str::FromStr;

    fn result(qtype: RecordType, answers: Vec<Record>) -> LookupResult {
        let req = query("www.example.com", qtype);
        LookupResult::synthetic(reply_with(&req, answers))
    }

    fn https_record(with_v6_hint: bool) -> Record {
        let mut params = vec![(
            SvcParamKey::Ipv4Hint,
            SvcParamValue::Ipv4Hint(IpHint(vec![A(Ipv4Addr::new(1, 2, 3, 4))])),
        )];
        if with_v6_hint {
            params.push((
                SvcParamKey::Ipv6Hint,
                SvcParamValue::Ipv6Hint(IpHint(vec![AAAA(Ipv6Addr::LOCALHOST)])),
            ));
        }
        let svcb = SVCB::new(1, Name::root(), params);
        Record::from_rdata(
            Name::from_str("www.example.com.").unwrap(),
            300,
            RData::HTTPS(HTTPS(svcb)),
        )
    }

    #[test]
    fn parse_attrs_skips_unknown_and_duplicates() {
        let attrs = parse_attrs("noipv4; NOHTTPS;bogus;noipv4;;");

        assert_eq!(attrs, vec![DomainAttr::NoIpv4, DomainAttr::NoHttps]);
    }

    #[test]
    fn attr_table_unions_matching_suffixes() {
        let table = AttrTable::new([("example.com", "noipv6"), ("www.example.com", "nocname")]);

        let attrs = table.lookup("WWW.example.com.");

        assert!(attrs.contains(&DomainAttr::NoIpv6));
        assert!(attrs.contains(&DomainAttr::NoCname));
        assert_eq!(table.lookup("mail.example.com"), vec![DomainAttr::NoIpv6]);
        assert!(table.lookup("example.org").is_empty());
    }

    #[test]
    fn filter_removes_matching_types_in_order() {
        let mut ret = result(
            RecordType::A,
            vec![
                cname_record("www.example.com", "edge.example.net"),
                a_record("edge.example.net", Ipv4Addr::new(1, 1, 1, 1)),
                a_record("edge.example.net", Ipv4Addr::new(2, 2, 2, 2)),
            ],
        );

        assert!(filter_by_attrs(&mut ret, &[DomainAttr::NoCname]));

        let types: Vec<_> = ret.reply.answers().iter().map(|rr| rr.record_type()).collect();
        assert_eq!(types, vec![RecordType::A, RecordType::A]);
        assert_eq!(crate::dns::reply_string(&ret.reply), "[IP]1.1.1.1;2.2.2.2;");
    }

    #[test]
    fn filter_is_idempotent() {
        let mut ret = result(
            RecordType::A,
            vec![
                a_record("www.example.com", Ipv4Addr::new(1, 1, 1, 1)),
                https_record(true),
            ],
        );
        let attrs = [DomainAttr::NoIpv4, DomainAttr::NoIpv6];

        assert!(filter_by_attrs(&mut ret, &attrs));
        let once = ret.reply.clone();

        assert!(!filter_by_attrs(&mut ret, &attrs));
        assert_eq!(ret.reply, once);
    }

    #[test]
    fn aaaa_with_noipv6_becomes_soa_reply() {
        let mut ret = result(
            RecordType::AAAA,
            vec![aaaa_record("www.example.com", Ipv6Addr::LOCALHOST)],
        );

        assert!(filter_by_attrs(&mut ret, &[DomainAttr::NoIpv6]));

        assert!(ret.reply.answers().is_empty());
        assert_eq!(ret.reply.id(), 0x1234);
        assert!(is_synthetic_empty(&ret.reply));
        assert!(!filter_by_attrs(&mut ret, &[DomainAttr::NoIpv6]));
    }

    #[test]
    fn noipv6_strips_only_the_https_ipv6_hint() {
        let mut ret = result(RecordType::HTTPS, vec![https_record(true)]);

        assert!(filter_by_attrs(&mut ret, &[DomainAttr::NoIpv6]));

        let Some(RData::HTTPS(HTTPS(svcb))) = ret.reply.answers()[0].data() else {
            panic!("expected HTTPS answer");
        };
        let keys: Vec<_> = svcb.svc_params().iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![SvcParamKey::Ipv4Hint]);
    }

    #[test]
    fn https_without_ipv6_hint_is_untouched() {
        let mut ret = result(RecordType::HTTPS, vec![https_record(false)]);

        assert!(!filter_by_attrs(&mut ret, &[DomainAttr::NoIpv6]));
        assert_eq!(ret.reply.answers().len(), 1);
    }

    #[test]
    fn no_attrs_changes_nothing() {
        let mut ret = result(
            RecordType::A,
            vec![a_record("www.example.com", Ipv4Addr::new(1, 1, 1, 1))],
        );

        assert!(!filter_by_attrs(&mut ret, &[]));
        assert_eq!(ret.reply.answers().len(), 1);
    }
}
