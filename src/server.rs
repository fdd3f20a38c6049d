//! Server orchestration.
//!
//! Binds the UDP and TCP listeners on one address and logs stats every minute.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

use crate::engine::Engine;
use crate::transport::{tcp::TcpTransport, udp::UdpTransport};

const STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Running listeners. Dropping it leaves the tasks running.
pub struct Server {
    pub udp_addr: SocketAddr,
    pub tcp_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl Server {
    /// Stop the listeners and the stats task.
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

/// Bind both listeners on `listen` and start serving with `engine`.
pub async fn start(listen: SocketAddr, engine: Arc<Engine>) -> io::Result<Server> {
    let udp = UdpTransport::bind(listen).await?;
    // Port 0 picks a UDP port first, then TCP takes the same one.
    let udp_addr = udp.local_addr()?;
    let tcp = TcpTransport::bind(udp_addr).await?;
    let tcp_addr = tcp.local_addr()?;

    tracing::info!(%udp_addr, %tcp_addr, "chinadns listening");

    let tasks = vec![
        udp.start(engine.clone()),
        tcp.start(engine.clone()),
        tokio::spawn(log_stats(engine)),
    ];

    Ok(Server {
        udp_addr,
        tcp_addr,
        tasks,
    })
}

async fn log_stats(engine: Arc<Engine>) {
    let started = Instant::now();
    let mut interval = tokio::time::interval(STATS_INTERVAL);
    interval.tick().await; // Skip first immediate tick
    loop {
        interval.tick().await;
        let stats = engine.stats_snapshot_and_reset();
        tracing::info!(
            uptime_secs = started.elapsed().as_secs(),
            cache = engine.cache_len(),
            requests = stats.requests,
            custom = stats.custom,
            cached = stats.cached,
            upstream = stats.upstream,
            adblocked = stats.adblocked,
            failed = stats.failed,
            avg_response_ms = format_args!("{:.2}", stats.avg_response_ms),
            "stats"
        );
    }
}
