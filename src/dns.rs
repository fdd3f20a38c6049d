//! DNS message helpers on top of `hickory-proto`.
//!
//! Question keys, reply construction (including the synthetic negative-cache
//! reply), answer summaries used for logging and trust decisions, and EDNS
//! sizing of outgoing requests.

use std::fmt;
use std::net::IpAddr;

use hickory_proto::op::{Edns, Message, MessageType, OpCode, ResponseCode};
use hickory_proto::rr::rdata::SOA;
use hickory_proto::rr::{Name, RData, Record, RecordType};

/// Smallest UDP payload every resolver must accept.
pub const MIN_UDP_SIZE: u16 = 512;

/// Retry value advertised by the synthetic SOA of an empty NOERROR reply.
pub const RETRY_NO_ERROR: i32 = 60;

const SOA_MNAME: &str = "fake-for-negative-caching.chinadns.com.";
const SOA_SERIAL: u32 = 100500;
const SOA_REFRESH: i32 = 1800;
const SOA_EXPIRE: i32 = 604800;
const SOA_MINIMUM: u32 = 86400;
const SOA_TTL: u32 = 10;

// DNAME has no typed rdata in hickory, match it by number.
const TYPE_DNAME: u16 = 39;

/// Cache key: lower-cased name without the trailing dot, plus query type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
    pub name: String,
    pub qtype: RecordType,
}

impl Question {
    pub fn new(name: &str, qtype: RecordType) -> Self {
        Self {
            name: normalize_domain(name),
            qtype,
        }
    }

    /// The first question of a message, if any.
    pub fn from_message(msg: &Message) -> Option<Self> {
        let query = msg.queries().first()?;
        Some(Self::new(&query.name().to_ascii(), query.query_type()))
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.name, self.qtype)
    }
}

/// Lower-case a domain and strip surrounding dots.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_matches('.').to_ascii_lowercase()
}

/// Start a reply to `request`: same id, opcode, flags and question section.
pub fn reply_for(request: &Message) -> Message {
    let mut reply = Message::new();
    reply
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_checking_disabled(request.checking_disabled())
        .set_response_code(ResponseCode::NoError);
    reply.add_queries(request.queries().iter().cloned());
    reply
}

/// An empty NOERROR reply carrying one SOA record so downstream resolvers
/// can negatively cache it for a short time.
pub fn empty_no_error(request: &Message) -> Message {
    empty_message(request, ResponseCode::NoError, RETRY_NO_ERROR)
}

pub fn empty_message(request: &Message, rcode: ResponseCode, retry: i32) -> Message {
    let mut reply = reply_for(request);
    reply
        .set_response_code(rcode)
        .set_recursion_available(true);
    reply.add_name_server(soa_record(request, retry));
    reply
}

/// Whether `reply` already is a synthesized empty reply.
pub fn is_synthetic_empty(reply: &Message) -> bool {
    reply.answers().is_empty()
        && reply.name_servers().first().is_some_and(|rr| match rr.data() {
            Some(RData::SOA(soa)) => soa.mname().to_ascii() == SOA_MNAME,
            _ => false,
        })
}

fn soa_record(request: &Message, retry: i32) -> Record {
    let zone = request
        .queries()
        .first()
        .map(|q| q.name().clone())
        .unwrap_or_else(Name::root);

    let mname = Name::from_ascii(SOA_MNAME).unwrap_or_else(|_| Name::root());
    let rname = if zone.is_root() {
        Name::from_ascii("hostmaster.")
    } else {
        Name::from_ascii(format!("hostmaster.{}", zone.to_ascii()))
    }
    .unwrap_or_else(|_| Name::root());

    let soa = SOA::new(
        mname,
        rname,
        SOA_SERIAL,
        SOA_REFRESH,
        retry,
        SOA_EXPIRE,
        SOA_MINIMUM,
    );
    Record::from_rdata(zone, SOA_TTL, RData::SOA(soa))
}

/// Addresses carried by A/AAAA answers, in answer order.
pub fn reply_ips(reply: &Message) -> Vec<IpAddr> {
    reply
        .answers()
        .iter()
        .filter_map(|rr| match rr.data() {
            Some(RData::A(a)) => Some(IpAddr::V4(a.0)),
            Some(RData::AAAA(aaaa)) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect()
}

/// Log summary of the answer content: IPs, CNAME/DNAME targets, HTTPS records.
pub fn reply_string(reply: &Message) -> String {
    let mut ips = String::new();
    let mut names = String::new();
    let mut https = String::new();

    for rr in reply.answers() {
        let rtype = rr.record_type();
        let (section, item) = match rr.data() {
            Some(RData::A(a)) => (&mut ips, a.0.to_string()),
            Some(RData::AAAA(aaaa)) => (&mut ips, aaaa.0.to_string()),
            Some(RData::CNAME(cname)) => (&mut names, cname.0.to_string()),
            Some(RData::HTTPS(_)) => (&mut https, rr.to_string()),
            Some(data) if u16::from(rtype) == TYPE_DNAME => (&mut names, data.to_string()),
            _ => continue,
        };
        section.push_str(&item);
        section.push(';');
    }

    let mut out = String::new();
    for (tag, section) in [("[IP]", ips), ("[CDNAME]", names), ("[HTTPS]", https)] {
        if !section.is_empty() {
            out.push_str(tag);
            out.push_str(&section);
        }
    }
    out
}

/// Whether `reply` answers with any record at all.
///
/// Decides both cacheability and whether a china answer counts as empty.
pub fn has_answer_content(reply: &Message) -> bool {
    !reply.answers().is_empty()
}

/// FORMERR reply for a datagram whose header is readable but whose body is not.
pub fn format_error(raw: &[u8]) -> Option<Message> {
    let header = raw.get(..12)?;
    let mut reply = Message::new();
    reply
        .set_id(u16::from_be_bytes([header[0], header[1]]))
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::from_u8((header[2] >> 3) & 0x0f).unwrap_or(OpCode::Query))
        .set_recursion_desired(header[2] & 0x01 != 0)
        .set_response_code(ResponseCode::FormErr);
    Some(reply)
}

/// Advertise an EDNS0 UDP payload of at least `size` on `request`.
///
/// An existing larger advertisement is kept. Returns the effective size.
pub fn set_udp_size(request: &mut Message, size: u16) -> u16 {
    if size <= MIN_UDP_SIZE {
        return MIN_UDP_SIZE;
    }

    if let Some(edns) = request.extensions_mut() {
        if edns.max_payload() >= size {
            return edns.max_payload();
        }
        edns.set_max_payload(size);
        return size;
    }

    let mut edns = Edns::new();
    edns.set_max_payload(size);
    request.set_edns(edns);
    size
}

/// UDP payload size the client advertised, or the classic 512 bytes.
pub fn max_udp_payload(request: &Message) -> usize {
    request
        .extensions()
        .as_ref()
        .map(|e| e.max_payload().max(MIN_UDP_SIZE))
        .unwrap_or(MIN_UDP_SIZE) as usize
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use hickory_proto::op::Query;
    use hickory_proto::rr::rdata::{A, AAAA, CNAME};
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::str::FromStr;

    pub(crate) fn query(domain: &str, qtype: RecordType) -> Message {
        let mut msg = Message::new();
        msg.set_id(0x1234).set_recursion_desired(true);
        msg.add_query(Query::query(
            Name::from_str(&format!("{domain}.")).unwrap(),
            qtype,
        ));
        msg
    }

    pub(crate) fn a_record(domain: &str, ip: Ipv4Addr) -> Record {
        Record::from_rdata(
            Name::from_str(&format!("{domain}.")).unwrap(),
            300,
            RData::A(A(ip)),
        )
    }

    pub(crate) fn aaaa_record(domain: &str, ip: Ipv6Addr) -> Record {
        Record::from_rdata(
            Name::from_str(&format!("{domain}.")).unwrap(),
            300,
            RData::AAAA(AAAA(ip)),
        )
    }

    pub(crate) fn cname_record(domain: &str, target: &str) -> Record {
        Record::from_rdata(
            Name::from_str(&format!("{domain}.")).unwrap(),
            300,
            RData::CNAME(CNAME(Name::from_str(&format!("{target}.")).unwrap())),
        )
    }

    pub(crate) fn reply_with(request: &Message, answers: Vec<Record>) -> Message {
        let mut reply = reply_for(request);
        reply.insert_answers(answers);
        reply
    }

    #[test]
    fn question_is_case_insensitive() {
        let a = Question::from_message(&query("WWW.Example.com", RecordType::A)).unwrap();
        let b = Question::new("www.example.com.", RecordType::A);

        assert_eq!(a, b);
        assert_eq!(a.to_string(), "www.example.com. A");
    }

    #[test]
    fn reply_for_keeps_id_and_question() {
        let req = query("example.com", RecordType::AAAA);

        let reply = reply_for(&req);

        assert_eq!(reply.id(), 0x1234);
        assert_eq!(reply.message_type(), MessageType::Response);
        assert_eq!(reply.queries(), req.queries());
        assert!(reply.answers().is_empty());
    }

    #[test]
    fn empty_no_error_carries_one_soa() {
        let req = query("example.com", RecordType::AAAA);

        let reply = empty_no_error(&req);

        assert_eq!(reply.response_code(), ResponseCode::NoError);
        assert!(reply.recursion_available());
        assert!(reply.answers().is_empty());
        assert_eq!(reply.name_servers().len(), 1);
        assert!(is_synthetic_empty(&reply));
        assert!(!is_synthetic_empty(&req));

        let ns = &reply.name_servers()[0];
        assert_eq!(ns.name().to_ascii(), "example.com.");
        match ns.data() {
            Some(RData::SOA(soa)) => {
                assert_eq!(soa.retry(), RETRY_NO_ERROR);
                assert_eq!(soa.refresh(), 1800);
                assert_eq!(soa.expire(), 604800);
                assert_eq!(soa.minimum(), 86400);
                assert_eq!(soa.rname().to_ascii(), "hostmaster.example.com.");
            }
            other => panic!("expected SOA, got {other:?}"),
        }
    }

    #[test]
    fn reply_string_summarizes_answers() {
        let req = query("www.example.com", RecordType::A);
        let reply = reply_with(
            &req,
            vec![
                cname_record("www.example.com", "edge.example.net"),
                a_record("edge.example.net", Ipv4Addr::new(1, 2, 3, 4)),
            ],
        );

        let s = reply_string(&reply);

        assert_eq!(s, "[IP]1.2.3.4;[CDNAME]edge.example.net.;");
        assert!(has_answer_content(&reply));
        assert_eq!(reply_ips(&reply), vec![IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4))]);
    }

    #[test]
    fn reply_string_empty_for_soa_only_reply() {
        let req = query("example.com", RecordType::A);

        assert_eq!(reply_string(&empty_no_error(&req)), "");
        assert!(!has_answer_content(&empty_no_error(&req)));
    }

    #[test]
    fn format_error_keeps_header_id() {
        let raw = [0xab, 0xcd, 0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];

        let reply = format_error(&raw).unwrap();

        assert_eq!(reply.id(), 0xabcd);
        assert_eq!(reply.response_code(), ResponseCode::FormErr);
        assert!(reply.recursion_desired());
        assert!(format_error(&raw[..11]).is_none());
    }

    #[test]
    fn set_udp_size_adds_and_raises_edns() {
        let mut req = query("example.com", RecordType::A);

        assert_eq!(set_udp_size(&mut req, 4096), 4096);
        assert_eq!(max_udp_payload(&req), 4096);

        assert_eq!(set_udp_size(&mut req, 1232), 4096);
        assert_eq!(set_udp_size(&mut req, 100), MIN_UDP_SIZE);
    }

    #[test]
    fn max_udp_payload_defaults_to_512() {
        let req = query("example.com", RecordType::A);

        assert_eq!(max_udp_payload(&req), 512);
    }
}
