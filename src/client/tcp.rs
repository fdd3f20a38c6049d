//! DNS over TCP with the 2-byte length prefix.

use hickory_proto::op::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::Instant;

use super::{check_id, decode, encode, until};
use crate::error::LookupError;
use crate::transport::{read_dns_message, write_dns_message};

pub(super) async fn exchange(
    request: &Message,
    addr: &str,
    deadline: Instant,
) -> Result<Message, LookupError> {
    until(deadline, async {
        let mut stream = TcpStream::connect(addr).await?;
        exchange_on(&mut stream, request).await
    })
    .await
}

/// Query over an already connected stream (direct or relayed).
pub(super) async fn exchange_on<S>(stream: &mut S, request: &Message) -> Result<Message, LookupError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let bytes = encode(request)?;
    write_dns_message(stream, &bytes).await?;

    let reply = read_dns_message(stream).await?;
    let reply = decode(&reply)?;
    check_id(request, &reply)?;
    Ok(reply)
}
