//! Client-facing listeners.
//!
//! UDP and TCP listeners decode each request, hand it to the engine on its own
//! task and write the reply back. Also holds the TCP length-prefix framing that
//! the upstream TCP client shares.

pub mod tcp;
pub mod udp;

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum size of a DNS packet (with some headroom).
pub const MAX_DNS_PACKET_SIZE: usize = 4096;

/// Smallest datagram that can hold a DNS header.
const DNS_HEADER_LEN: usize = 12;

/// Read one message framed by a 2-byte big-endian length prefix.
pub async fn read_dns_message<S>(stream: &mut S) -> io::Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let len = stream.read_u16().await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Write one message with its 2-byte length prefix.
pub async fn write_dns_message<S>(stream: &mut S, msg: &[u8]) -> io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let len = u16::try_from(msg.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "dns message too large"))?;
    let mut framed = Vec::with_capacity(2 + msg.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(msg);
    stream.write_all(&framed).await
}
