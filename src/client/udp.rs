//! Plain DNS over UDP.

use std::net::SocketAddr;

use hickory_proto::op::Message;
use tokio::net::{UdpSocket, lookup_host};
use tokio::time::Instant;

use super::{check_id, decode, encode, until};
use crate::dns::max_udp_payload;
use crate::error::LookupError;
use crate::transport::MAX_DNS_PACKET_SIZE;

pub(super) async fn exchange(
    request: &Message,
    addr: &str,
    deadline: Instant,
) -> Result<Message, LookupError> {
    let bytes = encode(request)?;
    let buf_size = max_udp_payload(request).max(MAX_DNS_PACKET_SIZE);

    until(deadline, async {
        let target = resolve(addr).await?;
        let socket = UdpSocket::bind(unspecified_for(target)).await?;
        socket.connect(target).await?;
        socket.send(&bytes).await?;

        let mut buf = vec![0u8; buf_size];
        let len = socket.recv(&mut buf).await?;
        let reply = decode(&buf[..len])?;
        check_id(request, &reply)?;
        Ok::<_, LookupError>(reply)
    })
    .await
}

pub(super) async fn resolve(addr: &str) -> Result<SocketAddr, LookupError> {
    lookup_host(addr).await?.next().ok_or_else(|| {
        LookupError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no address for {addr}"),
        ))
    })
}

pub(super) fn unspecified_for(target: SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}
