//! UDP listener.
//!
//! Each datagram is decoded and served on its own task. Replies larger than
//! the client's advertised payload are replaced by an empty truncated reply so
//! the client retries over TCP.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::Message;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use super::{DNS_HEADER_LEN, MAX_DNS_PACKET_SIZE};
use crate::dns::{format_error, max_udp_payload, reply_for};
use crate::engine::Engine;

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);

        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Spawn the receive loop.
    pub fn start(self, engine: Arc<Engine>) -> JoinHandle<()> {
        tokio::spawn(run(self.socket, engine))
    }
}

async fn run(socket: Arc<UdpSocket>, engine: Arc<Engine>) {
    let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(err = %e, "udp recv error");
                continue;
            }
        };

        if len < DNS_HEADER_LEN {
            continue;
        }

        let request = match Message::from_vec(&buf[..len]) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(%src, err = %e, "undecodable udp request");
                let reply = format_error(&buf[..len]).and_then(|m| m.to_vec().ok());
                if let Some(bytes) = reply {
                    if let Err(e) = socket.send_to(&bytes, src).await {
                        tracing::warn!(%src, err = %e, "udp send error");
                    }
                }
                continue;
            }
        };

        let socket = socket.clone();
        let engine = engine.clone();
        tokio::spawn(async move {
            let max = max_udp_payload(&request);
            let reply = engine.serve(request).await;
            let Some(bytes) = encode_for_udp(&reply, max) else {
                return;
            };
            if let Err(e) = socket.send_to(&bytes, src).await {
                tracing::warn!(%src, err = %e, "udp send error");
            }
        });
    }
}

/// Encode `reply`, or its truncated stand-in when it exceeds `max` bytes.
fn encode_for_udp(reply: &Message, max: usize) -> Option<Vec<u8>> {
    let bytes = match reply.to_vec() {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(err = %e, "encode reply");
            return None;
        }
    };
    if bytes.len() <= max {
        return Some(bytes);
    }

    let mut truncated = reply_for(reply);
    truncated
        .set_truncated(true)
        .set_recursion_available(reply.recursion_available())
        .set_response_code(reply.response_code());
    truncated.to_vec().ok()
}
