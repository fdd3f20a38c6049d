//! TCP listener.
//!
//! Each client connection is handled independently. Requests on one
//! connection are answered in order until the client closes it or stays idle
//! too long.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::Message;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::{read_dns_message, write_dns_message};
use crate::engine::Engine;

const IDLE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TcpTransport {
    listener: TcpListener,
}

impl TcpTransport {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawn the accept loop.
    pub fn start(self, engine: Arc<Engine>) -> JoinHandle<()> {
        tokio::spawn(run_accept_loop(self.listener, engine))
    }
}

async fn run_accept_loop(listener: TcpListener, engine: Arc<Engine>) {
    loop {
        match listener.accept().await {
            Ok((client, peer)) => {
                tokio::spawn(handle_connection(client, peer, engine.clone()));
            }
            Err(e) => {
                tracing::warn!(err = %e, "tcp accept error");
            }
        }
    }
}

async fn handle_connection(mut client: TcpStream, peer: SocketAddr, engine: Arc<Engine>) {
    loop {
        let query = match tokio::time::timeout(IDLE_TIMEOUT, read_dns_message(&mut client)).await {
            Ok(Ok(q)) => q,
            Ok(Err(_)) | Err(_) => return,
        };

        let request = match Message::from_vec(&query) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(%peer, err = %e, "undecodable tcp request");
                return;
            }
        };

        let reply = engine.serve(request).await;
        let bytes = match reply.to_vec() {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(%peer, err = %e, "encode reply");
                return;
            }
        };
        if write_dns_message(&mut client, &bytes).await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::tests::query;
    use crate::engine::CustomTable;
    use crate::engine::race::tests::MockExchange;
    use crate::resolver::ResolverSet;
    use hickory_proto::rr::RecordType;

    #[tokio::test]
    async fn answers_several_queries_on_one_connection() {
        let engine = Engine::builder(Arc::new(MockExchange::default()), ResolverSet::default())
            .custom(CustomTable::new([("router.lan", "192.168.1.1;fd00::1")]))
            .build();
        let transport = TcpTransport::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = transport.local_addr().unwrap();
        transport.start(Arc::new(engine));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        for qtype in [RecordType::A, RecordType::AAAA] {
            let req = query("router.lan", qtype);
            write_dns_message(&mut stream, &req.to_vec().unwrap()).await.unwrap();

            let reply = Message::from_vec(&read_dns_message(&mut stream).await.unwrap()).unwrap();

            assert_eq!(reply.id(), req.id());
            assert_eq!(reply.answers().len(), 1);
            assert_eq!(reply.answers()[0].record_type(), qtype);
        }
    }
}
