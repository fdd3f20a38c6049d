//! Per-request resolution.
//!
//! Every request goes through the same steps: custom table, cache, then an
//! upstream lookup routed by the domain lists and the pollution check, raced
//! against the ad-block resolvers. The upstream reply is filtered, cached when
//! it carries content, and returned with the client's transaction id. Any
//! failure is answered with an empty NOERROR reply carrying a synthetic SOA.

mod custom;
pub mod race;

use std::pin::pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{Either, select};
use hickory_proto::op::{Message, ResponseCode};
use tracing::Instrument;

use crate::cache::DnsCache;
use crate::client::{Exchange, LookupResult};
use crate::dns::{
    Question, RETRY_NO_ERROR, empty_message, empty_no_error, has_answer_content, reply_ips,
    reply_string, set_udp_size,
};
use crate::error::RaceError;
use crate::filter::{AdBlockJudge, AttrTable, DomainAttr, filter_by_attrs};
use crate::resolver::{Bucket, ResolverSet};
use crate::rules::{ChinaCidr, DomainMatcher};
use crate::stats::{Outcome, Stats, StatsSnapshot};

pub use custom::CustomTable;

/// Deadline of a full bucket race.
pub const RACE_TIMEOUT: Duration = Duration::from_secs(2);
/// Deadline of the china race when the domain is on neither list.
pub const CHINA_PROBE_TIMEOUT: Duration = Duration::from_millis(200);
/// Overall deadline of the abroad race when the domain is on neither list.
pub const ABROAD_WAIT: Duration = Duration::from_secs(3);

pub struct Engine {
    exchanger: Arc<dyn Exchange>,
    resolvers: ResolverSet,
    china_domains: DomainMatcher,
    gfw_domains: DomainMatcher,
    china_cidr: ChinaCidr,
    custom: CustomTable,
    abroad_attrs: Vec<DomainAttr>,
    domain_attrs: AttrTable,
    adblock: AdBlockJudge,
    cache: DnsCache,
    stats: Stats,
    udp_max_bytes: u16,
    tcp_only: bool,
}

/// Collects the immutable parts of an [`Engine`].
pub struct EngineBuilder {
    engine: Engine,
}

impl EngineBuilder {
    pub fn china_domains(mut self, matcher: DomainMatcher) -> Self {
        self.engine.china_domains = matcher;
        self
    }

    pub fn gfw_domains(mut self, matcher: DomainMatcher) -> Self {
        self.engine.gfw_domains = matcher;
        self
    }

    pub fn china_cidr(mut self, cidr: ChinaCidr) -> Self {
        self.engine.china_cidr = cidr;
        self
    }

    pub fn custom(mut self, custom: CustomTable) -> Self {
        self.engine.custom = custom;
        self
    }

    pub fn abroad_attrs(mut self, attrs: Vec<DomainAttr>) -> Self {
        self.engine.abroad_attrs = attrs;
        self
    }

    pub fn domain_attrs(mut self, table: AttrTable) -> Self {
        self.engine.domain_attrs = table;
        self
    }

    pub fn adblock(mut self, judge: AdBlockJudge) -> Self {
        self.engine.adblock = judge;
        self
    }

    pub fn cache(mut self, cache: DnsCache) -> Self {
        self.engine.cache = cache;
        self
    }

    pub fn udp_max_bytes(mut self, size: u16) -> Self {
        self.engine.udp_max_bytes = size;
        self
    }

    pub fn tcp_only(mut self, tcp_only: bool) -> Self {
        self.engine.tcp_only = tcp_only;
        self
    }

    pub fn build(self) -> Engine {
        self.engine
    }
}

impl Engine {
    pub fn builder(exchanger: Arc<dyn Exchange>, resolvers: ResolverSet) -> EngineBuilder {
        EngineBuilder {
            engine: Engine {
                exchanger,
                resolvers,
                china_domains: DomainMatcher::new(),
                gfw_domains: DomainMatcher::new(),
                china_cidr: ChinaCidr::default(),
                custom: CustomTable::default(),
                abroad_attrs: Vec::new(),
                domain_attrs: AttrTable::default(),
                adblock: AdBlockJudge::default(),
                cache: DnsCache::from_secs(0),
                stats: Stats::new(),
                udp_max_bytes: 4096,
                tcp_only: false,
            },
        }
    }

    /// Answer one client request. Always returns a reply.
    pub async fn serve(&self, request: Message) -> Message {
        let Some(question) = Question::from_message(&request) else {
            return empty_message(&request, ResponseCode::FormErr, RETRY_NO_ERROR);
        };
        let span = tracing::debug_span!(
            "serve",
            aq = %question,
            aid = format_args!("{:x}", request.id())
        );
        self.serve_question(request, question).instrument(span).await
    }

    async fn serve_question(&self, mut request: Message, question: Question) -> Message {
        let start = Instant::now();

        if let Some(reply) = self.custom.lookup(&request, &question) {
            let result = LookupResult::synthetic(reply);
            self.log_reply(Outcome::Custom, start, &result, false);
            return result.reply;
        }

        if let Some(mut hit) = self.cache.get(&question) {
            hit.reply.set_id(request.id());
            self.log_reply(Outcome::Cached, start, &hit, false);
            return hit.reply;
        }

        request.set_recursion_desired(true);
        if !self.tcp_only {
            set_udp_size(&mut request, self.udp_max_bytes);
        }
        let request = Arc::new(request);

        let (mut result, outcome) = match self.resolve(&request, &question).await {
            Ok((result, true)) => (result, Outcome::AdBlocked),
            Ok((result, false)) => (result, Outcome::Upstream),
            Err(e) => {
                tracing::warn!(err = %e, "query error");
                let result = LookupResult::synthetic(empty_no_error(&request));
                self.log_reply(Outcome::Failed, start, &result, false);
                return result.reply;
            }
        };

        let attrs = self.attrs_for(&result, &question);
        let filtered = filter_by_attrs(&mut result, &attrs);
        if has_answer_content(&result.reply) {
            self.cache.set(&question, result.clone());
        }
        self.log_reply(outcome, start, &result, filtered);
        result.reply
    }

    /// Upstream answer plus whether it is an ad-block verdict.
    async fn resolve(
        &self,
        request: &Arc<Message>,
        question: &Question,
    ) -> Result<(LookupResult, bool), RaceError> {
        let adblock = self.resolvers.bucket(Bucket::AdBlock);
        if adblock.is_empty() {
            return self.classify(request, question).await.map(|r| (r, false));
        }

        let classify = pin!(self.classify(request, question));
        let ad = pin!(race::lookup_in_resolvers(
            &self.exchanger,
            request,
            adblock,
            RACE_TIMEOUT
        ));
        match select(classify, ad).await {
            Either::Left((classified, _)) => classified.map(|r| (r, false)),
            Either::Right((Ok(blocked), _)) if self.adblock.is_block_reply(&blocked.reply) => {
                tracing::debug!(dns = ?blocked.resolver.as_deref().map(|r| r.addr()), "adblock reply");
                Ok((blocked, true))
            }
            Either::Right((_, classify)) => classify.await.map(|r| (r, false)),
        }
    }

    async fn classify(
        &self,
        request: &Arc<Message>,
        question: &Question,
    ) -> Result<LookupResult, RaceError> {
        if self.china_domains.is_match(&question.name) {
            return self.race(Bucket::China, request, RACE_TIMEOUT).await;
        }
        if self.gfw_domains.is_match(&question.name) {
            return self.race(Bucket::Abroad, request, RACE_TIMEOUT).await;
        }
        self.pollution_fallback(request, question).await
    }

    async fn race(
        &self,
        bucket: Bucket,
        request: &Arc<Message>,
        within: Duration,
    ) -> Result<LookupResult, RaceError> {
        race::lookup_in_resolvers(&self.exchanger, request, self.resolvers.bucket(bucket), within)
            .await
    }

    /// Ask china resolvers briefly; fall back to the already running abroad
    /// race when their answer is missing, empty or outside China.
    async fn pollution_fallback(
        &self,
        request: &Arc<Message>,
        question: &Question,
    ) -> Result<LookupResult, RaceError> {
        let abroad = race::start(
            &self.exchanger,
            request,
            self.resolvers.bucket(Bucket::Abroad),
            ABROAD_WAIT,
        );

        let reason = match self.race(Bucket::China, request, CHINA_PROBE_TIMEOUT).await {
            Err(e) => {
                tracing::debug!(err = %e, "china lookup failed");
                "lookup china dns error"
            }
            Ok(china) if !has_answer_content(&china.reply) => "china reply is empty",
            Ok(china) if !self.is_reply_ip_china(&china.reply) => "china reply is abroad",
            Ok(china) => return Ok(china),
        };
        tracing::info!(domain = %question.name, reason, "try abroad dns");

        abroad.wait().await.map_err(|e| match e {
            RaceError::Timeout(_) => RaceError::FallbackTimeout,
            e => e,
        })
    }

    /// The first answer address decides; a reply without addresses counts as China.
    fn is_reply_ip_china(&self, reply: &Message) -> bool {
        reply_ips(reply)
            .first()
            .is_none_or(|ip| self.china_cidr.contains(*ip))
    }

    fn attrs_for(&self, result: &LookupResult, question: &Question) -> Vec<DomainAttr> {
        let mut attrs = match result.bucket() {
            Some(Bucket::Abroad) => self.abroad_attrs.clone(),
            _ => Vec::new(),
        };
        for attr in self.domain_attrs.lookup(&question.name) {
            if !attrs.contains(&attr) {
                attrs.push(attr);
            }
        }
        attrs
    }

    fn log_reply(&self, outcome: Outcome, start: Instant, result: &LookupResult, filtered: bool) {
        let elapsed = start.elapsed();
        self.stats.record(outcome, elapsed);
        tracing::debug!(
            rtt = elapsed.as_millis() as u64,
            dns = ?result.resolver.as_deref().map(|r| r.addr()),
            reply = %reply_string(&result.reply),
            filter = filtered,
            cache = outcome == Outcome::Cached,
            "dns reply"
        );
    }

    pub fn stats_snapshot_and_reset(&self) -> StatsSnapshot {
        self.stats.snapshot_and_reset()
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn resolvers(&self) -> &ResolverSet {
        &self.resolvers
    }
}
