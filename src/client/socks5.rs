//! Resolver access through a SOCKS5 relay (RFC 1928).
//!
//! TCP goes through `tokio-socks` CONNECT. UDP uses UDP ASSOCIATE: the control
//! connection stays open for the lifetime of the exchange and every datagram
//! carries the `RSV | FRAG | ATYP | DST.ADDR | DST.PORT` header.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use hickory_proto::op::Message;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::Instant;
use tokio_socks::tcp::Socks5Stream;

use super::udp::unspecified_for;
use super::{check_id, decode, encode, tcp, until};
use crate::error::LookupError;
use crate::transport::MAX_DNS_PACKET_SIZE;

const SOCKS5_VERSION: u8 = 0x05;
const AUTH_METHOD_NONE: u8 = 0x00;
const CMD_UDP_ASSOCIATE: u8 = 0x03;
const REPLY_SUCCEEDED: u8 = 0x00;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

pub(super) async fn exchange_tcp(
    request: &Message,
    relay: &str,
    addr: &str,
    deadline: Instant,
) -> Result<Message, LookupError> {
    until(deadline, async {
        let mut stream = Socks5Stream::connect(relay, addr)
            .await
            .map_err(|e| LookupError::Socks(e.to_string()))?
            .into_inner();
        tcp::exchange_on(&mut stream, request).await
    })
    .await
}

pub(super) async fn exchange_udp(
    request: &Message,
    relay: &str,
    addr: &str,
    deadline: Instant,
) -> Result<Message, LookupError> {
    let bytes = encode(request)?;

    until(deadline, async {
        let mut control = TcpStream::connect(relay).await?;
        let relay_addr = associate(&mut control).await?;

        let socket = UdpSocket::bind(unspecified_for(relay_addr)).await?;
        socket.connect(relay_addr).await?;
        socket.send(&encapsulate(addr, &bytes)?).await?;

        let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE + 262];
        let len = socket.recv(&mut buf).await?;
        let reply = decode(decapsulate(&buf[..len])?)?;
        check_id(request, &reply)?;
        drop(control);
        Ok::<_, LookupError>(reply)
    })
    .await
}

/// No-auth handshake plus UDP ASSOCIATE; returns the relay's UDP endpoint.
async fn associate(control: &mut TcpStream) -> Result<SocketAddr, LookupError> {
    control
        .write_all(&[SOCKS5_VERSION, 1, AUTH_METHOD_NONE])
        .await?;
    let mut method = [0u8; 2];
    control.read_exact(&mut method).await?;
    if method[0] != SOCKS5_VERSION || method[1] != AUTH_METHOD_NONE {
        return Err(LookupError::Socks(format!(
            "unexpected method selection {method:02x?}"
        )));
    }

    control
        .write_all(&[
            SOCKS5_VERSION,
            CMD_UDP_ASSOCIATE,
            0x00,
            ATYP_IPV4,
            0,
            0,
            0,
            0,
            0,
            0,
        ])
        .await?;

    let mut header = [0u8; 4];
    control.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(LookupError::Socks(format!("bad version {:#04x}", header[0])));
    }
    if header[1] != REPLY_SUCCEEDED {
        return Err(LookupError::Socks(format!(
            "udp associate refused with code {:#04x}",
            header[1]
        )));
    }

    let ip = match header[3] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            control.read_exact(&mut octets).await?;
            IpAddr::V4(Ipv4Addr::from(octets))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            control.read_exact(&mut octets).await?;
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        other => {
            return Err(LookupError::Socks(format!(
                "unsupported bound address type {other:#04x}"
            )));
        }
    };
    let port = control.read_u16().await?;

    // A relay bound to the wildcard address is reachable at the control peer.
    let ip = if ip.is_unspecified() {
        control.peer_addr()?.ip()
    } else {
        ip
    };
    Ok(SocketAddr::new(ip, port))
}

/// Prefix `data` with the UDP request header addressed to `dest` (`host:port`).
fn encapsulate(dest: &str, data: &[u8]) -> Result<Vec<u8>, LookupError> {
    let mut packet = Vec::with_capacity(data.len() + 262);
    packet.extend_from_slice(&[0, 0, 0]);

    match dest.parse::<SocketAddr>() {
        Ok(SocketAddr::V4(v4)) => {
            packet.push(ATYP_IPV4);
            packet.extend_from_slice(&v4.ip().octets());
            packet.extend_from_slice(&v4.port().to_be_bytes());
        }
        Ok(SocketAddr::V6(v6)) => {
            packet.push(ATYP_IPV6);
            packet.extend_from_slice(&v6.ip().octets());
            packet.extend_from_slice(&v6.port().to_be_bytes());
        }
        Err(_) => {
            let (host, port) = dest
                .rsplit_once(':')
                .and_then(|(h, p)| Some((h, p.parse::<u16>().ok()?)))
                .ok_or_else(|| LookupError::Socks(format!("bad destination {dest:?}")))?;
            let len = u8::try_from(host.len())
                .map_err(|_| LookupError::Socks(format!("domain too long: {host}")))?;
            packet.push(ATYP_DOMAIN);
            packet.push(len);
            packet.extend_from_slice(host.as_bytes());
            packet.extend_from_slice(&port.to_be_bytes());
        }
    }

    packet.extend_from_slice(data);
    Ok(packet)
}

/// Strip the UDP reply header and return the payload.
fn decapsulate(packet: &[u8]) -> Result<&[u8], LookupError> {
    let short = || LookupError::Socks(format!("udp packet too short: {} bytes", packet.len()));
    if packet.len() < 4 {
        return Err(short());
    }
    if packet[0] != 0 || packet[1] != 0 {
        return Err(LookupError::Socks("reserved field must be zero".into()));
    }
    if packet[2] != 0 {
        return Err(LookupError::Socks(format!(
            "fragmented packet not supported (frag={})",
            packet[2]
        )));
    }

    let offset = match packet[3] {
        ATYP_IPV4 => 4 + 4 + 2,
        ATYP_IPV6 => 4 + 16 + 2,
        ATYP_DOMAIN => {
            let len = *packet.get(4).ok_or_else(short)? as usize;
            5 + len + 2
        }
        other => {
            return Err(LookupError::Socks(format!(
                "unsupported address type {other:#04x}"
            )));
        }
    };
    packet.get(offset..).ok_or_else(short)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::tests::{a_record, query, reply_with};
    use hickory_proto::rr::RecordType;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[test]
    fn encapsulate_ipv4() {
        let packet = encapsulate("8.8.8.8:53", b"dns").unwrap();

        assert_eq!(&packet[..4], &[0, 0, 0, ATYP_IPV4]);
        assert_eq!(&packet[4..8], &[8, 8, 8, 8]);
        assert_eq!(&packet[8..10], &[0, 53]);
        assert_eq!(&packet[10..], b"dns");
    }

    #[test]
    fn encapsulate_ipv6_and_domain() {
        let v6 = encapsulate("[2001:4860:4860::8888]:53", b"x").unwrap();
        let domain = encapsulate("dns.example:5353", b"x").unwrap();

        assert_eq!(v6[3], ATYP_IPV6);
        assert_eq!(v6.len(), 4 + 16 + 2 + 1);
        assert_eq!(domain[3], ATYP_DOMAIN);
        assert_eq!(domain[4] as usize, "dns.example".len());
        assert_eq!(&domain[16..18], &5353u16.to_be_bytes());
    }

    #[test]
    fn decapsulate_round_trips_payload() {
        let packet = encapsulate("1.1.1.1:53", b"payload").unwrap();

        assert_eq!(decapsulate(&packet).unwrap(), b"payload");
    }

    #[test]
    fn decapsulate_rejects_fragments_and_short_packets() {
        assert!(decapsulate(&[0, 0, 1, ATYP_IPV4, 1, 2, 3, 4, 0, 53]).is_err());
        assert!(decapsulate(&[0, 0, 0, ATYP_IPV4, 1, 2]).is_err());
        assert!(decapsulate(&[0, 1, 0, ATYP_IPV4, 1, 2, 3, 4, 0, 53]).is_err());
    }

    /// Minimal relay: accepts one UDP ASSOCIATE and answers one query itself.
    async fn fake_relay() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut control, _) = listener.accept().await.unwrap();
            let mut greeting = [0u8; 3];
            control.read_exact(&mut greeting).await.unwrap();
            control.write_all(&[SOCKS5_VERSION, AUTH_METHOD_NONE]).await.unwrap();
            let mut req = [0u8; 10];
            control.read_exact(&mut req).await.unwrap();
            assert_eq!(req[1], CMD_UDP_ASSOCIATE);

            let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let port = udp.local_addr().unwrap().port();
            let mut reply = vec![SOCKS5_VERSION, REPLY_SUCCEEDED, 0, ATYP_IPV4, 0, 0, 0, 0];
            reply.extend_from_slice(&port.to_be_bytes());
            control.write_all(&reply).await.unwrap();

            let mut buf = [0u8; 1500];
            let (len, src) = udp.recv_from(&mut buf).await.unwrap();
            let query = Message::from_vec(decapsulate(&buf[..len]).unwrap()).unwrap();
            let answer = reply_with(&query, vec![a_record("example.com", Ipv4Addr::new(9, 9, 9, 9))]);
            let packet = encapsulate("8.8.8.8:53", &answer.to_vec().unwrap()).unwrap();
            udp.send_to(&packet, src).await.unwrap();

            let mut rest = Vec::new();
            let _ = control.read_to_end(&mut rest).await;
        });
        addr
    }

    #[tokio::test]
    async fn exchange_udp_through_relay() {
        let relay = fake_relay().await;
        let req = query("example.com", RecordType::A);

        let reply = exchange_udp(&req, &relay, "8.8.8.8:53", Instant::now() + Duration::from_secs(2))
            .await
            .unwrap();

        assert_eq!(reply.id(), req.id());
        assert_eq!(crate::dns::reply_string(&reply), "[IP]9.9.9.9;");
    }
}
