//! Upstream lookup client.
//!
//! Executes one query against one resolver by walking its protocol chain
//! (udp, tcp, doh), optionally tunnelled through a SOCKS5 relay.

mod doh;
mod socks5;
mod tcp;
mod udp;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::Message;
use rustc_hash::FxHashMap;
use tokio::time::Instant;

use crate::error::{ConfigError, LookupError};
use crate::resolver::{Bucket, Protocol, Resolver, ResolverSet};

/// A decoded reply and the resolver it came from.
///
/// `resolver` is `None` only for replies the proxy synthesized itself.
#[derive(Debug, Clone)]
pub struct LookupResult {
    pub reply: Message,
    pub resolver: Option<Arc<Resolver>>,
}

impl LookupResult {
    pub fn new(reply: Message, resolver: Arc<Resolver>) -> Self {
        Self {
            reply,
            resolver: Some(resolver),
        }
    }

    pub fn synthetic(reply: Message) -> Self {
        Self {
            reply,
            resolver: None,
        }
    }

    pub fn bucket(&self) -> Option<Bucket> {
        self.resolver.as_ref().map(|r| r.bucket())
    }
}

/// Reply of one exchange plus a diagnostic label (`useproxy:...` when relayed).
#[derive(Debug)]
pub struct Exchanged {
    pub reply: Message,
    pub label: String,
}

/// Sends one request to one resolver before `deadline`.
#[async_trait]
pub trait Exchange: Send + Sync {
    async fn exchange(
        &self,
        request: &Message,
        resolver: &Resolver,
        deadline: Instant,
    ) -> Result<Exchanged, LookupError>;
}

/// Production [`Exchange`] over real sockets.
pub struct LookupClient {
    timeout: Duration,
    http: reqwest::Client,
    // Keyed by relay address.
    proxied_http: FxHashMap<String, reqwest::Client>,
}

impl LookupClient {
    /// Build a client for every resolver in `resolvers`, including one DoH
    /// HTTP client per distinct SOCKS5 relay.
    pub fn new(timeout: Duration, resolvers: &ResolverSet) -> Result<Self, ConfigError> {
        let http = http_client(timeout, None)?;
        let mut proxied_http = FxHashMap::default();
        for bucket in [Bucket::China, Bucket::Abroad, Bucket::AdBlock] {
            for resolver in resolvers.bucket(bucket) {
                if let Some(proxy) = resolver.proxy() {
                    if !proxied_http.contains_key(&proxy.addr) {
                        proxied_http.insert(proxy.addr.clone(), http_client(timeout, Some(&proxy.addr))?);
                    }
                }
            }
        }
        Ok(Self {
            timeout,
            http,
            proxied_http,
        })
    }

    async fn exchange_step(
        &self,
        protocol: Protocol,
        request: &Message,
        resolver: &Resolver,
        deadline: Instant,
    ) -> Result<Message, LookupError> {
        let relay = resolver.proxy().map(|p| p.addr.as_str());
        match (protocol, relay) {
            (Protocol::Udp, None) => udp::exchange(request, resolver.addr(), deadline).await,
            (Protocol::Udp, Some(relay)) => {
                socks5::exchange_udp(request, relay, resolver.addr(), deadline).await
            }
            (Protocol::Tcp, None) => tcp::exchange(request, resolver.addr(), deadline).await,
            (Protocol::Tcp, Some(relay)) => {
                socks5::exchange_tcp(request, relay, resolver.addr(), deadline).await
            }
            (Protocol::Doh, relay) => {
                let client = match relay {
                    Some(relay) => self
                        .proxied_http
                        .get(relay)
                        .ok_or_else(|| LookupError::Socks(format!("no http client for {relay}")))?,
                    None => &self.http,
                };
                doh::exchange(client, request, resolver.addr(), deadline).await
            }
        }
    }
}

#[async_trait]
impl Exchange for LookupClient {
    async fn exchange(
        &self,
        request: &Message,
        resolver: &Resolver,
        deadline: Instant,
    ) -> Result<Exchanged, LookupError> {
        let label = resolver
            .proxy()
            .map(|p| format!("useproxy:{p}"))
            .unwrap_or_default();
        let protocols = resolver.protocols();
        let mut last_err = LookupError::EmptyChain;

        for (idx, protocol) in protocols.iter().enumerate() {
            let step_deadline = deadline.min(Instant::now() + self.timeout);
            match self.exchange_step(*protocol, request, resolver, step_deadline).await {
                Ok(reply) => {
                    if reply.truncated() {
                        let tcp_next = protocols[idx + 1..].contains(&Protocol::Tcp);
                        tracing::debug!(dns = %resolver, protocol = protocol.as_str(), tcp_next, "reply truncated");
                        if tcp_next {
                            continue;
                        }
                    }
                    return Ok(Exchanged { reply, label });
                }
                Err(e) => {
                    tracing::debug!(dns = %resolver, protocol = protocol.as_str(), err = %e, "exchange failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}

fn http_client(timeout: Duration, relay: Option<&str>) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder().timeout(timeout).use_rustls_tls();
    if let Some(relay) = relay {
        let proxy = reqwest::Proxy::all(format!("socks5h://{relay}"))
            .map_err(|e| ConfigError::Http(e.to_string()))?;
        builder = builder.proxy(proxy);
    }
    builder.build().map_err(|e| ConfigError::Http(e.to_string()))
}

/// Run `fut` until `deadline`, mapping expiry to [`LookupError::Timeout`].
async fn until<T>(
    deadline: Instant,
    fut: impl std::future::Future<Output = Result<T, LookupError>>,
) -> Result<T, LookupError> {
    let budget = deadline.saturating_duration_since(Instant::now());
    tokio::time::timeout_at(deadline, fut)
        .await
        .map_err(|_| LookupError::Timeout(budget))?
}

fn encode(request: &Message) -> Result<Vec<u8>, LookupError> {
    request.to_vec().map_err(|e| LookupError::Encode(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Message, LookupError> {
    Message::from_vec(bytes).map_err(|e| LookupError::Decode(e.to_string()))
}

fn check_id(request: &Message, reply: &Message) -> Result<(), LookupError> {
    if request.id() != reply.id() {
        return Err(LookupError::IdMismatch {
            want: request.id(),
            got: reply.id(),
        });
    }
    Ok(())
}
