//! DNS over HTTPS, RFC 8484 GET.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hickory_proto::op::Message;
use reqwest::{StatusCode, Url, header};
use tokio::time::Instant;

use super::{decode, encode, until};
use crate::dns::normalize_domain;
use crate::error::LookupError;

const DNS_MESSAGE: &str = "application/dns-message";

pub(super) async fn exchange(
    client: &reqwest::Client,
    request: &Message,
    url: &str,
    deadline: Instant,
) -> Result<Message, LookupError> {
    let url = Url::parse(url).map_err(|e| LookupError::Http(e.to_string()))?;
    if queries_endpoint(request, &url) {
        return Err(LookupError::QueryMyself);
    }

    // RFC 8484 4.1: id is zero on the wire.
    let mut outgoing = request.clone();
    outgoing.set_id(0);
    let dns = URL_SAFE_NO_PAD.encode(encode(&outgoing)?);

    until(deadline, async {
        let resp = client
            .get(url)
            .query(&[("dns", dns.as_str())])
            .header(header::ACCEPT, DNS_MESSAGE)
            .send()
            .await
            .map_err(|e| LookupError::Http(e.to_string()))?;
        if resp.status() != StatusCode::OK {
            return Err(LookupError::Http(format!("status {}", resp.status())));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| LookupError::Http(e.to_string()))?;
        let mut reply = decode(&body)?;
        reply.set_id(request.id());
        Ok(reply)
    })
    .await
}

/// Whether the question asks for the endpoint's own hostname.
fn queries_endpoint(request: &Message, url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return false;
    };
    request
        .queries()
        .first()
        .is_some_and(|q| normalize_domain(&q.name().to_ascii()) == normalize_domain(host))
}
