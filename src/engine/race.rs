//! Racing one request across every resolver of a bucket.

use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::Message;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::client::{Exchange, LookupResult};
use crate::dns::reply_string;
use crate::error::{MultiError, RaceError};
use crate::resolver::Resolver;

/// A race in flight. Resolver tasks are already running when this exists.
pub struct Race {
    rx: mpsc::Receiver<LookupResult>,
    errs: Arc<MultiError>,
    deadline: Instant,
    within: Duration,
    empty: bool,
}

/// Spawn one task per resolver, all bound by a deadline `within` from now.
///
/// Losing tasks are left to finish on their own; the deadline bounds them.
pub fn start(
    exchanger: &Arc<dyn Exchange>,
    request: &Arc<Message>,
    resolvers: &[Arc<Resolver>],
    within: Duration,
) -> Race {
    let deadline = Instant::now() + within;
    let errs = Arc::new(MultiError::new());
    // Single slot: the first reply wins, later ones are dropped on the floor.
    let (tx, rx) = mpsc::channel(1);

    for resolver in resolvers {
        let tx = tx.clone();
        let errs = errs.clone();
        let exchanger = exchanger.clone();
        let request = request.clone();
        let resolver = resolver.clone();

        tokio::spawn(async move {
            let start = Instant::now();
            let result = exchanger.exchange(&request, &resolver, deadline).await;
            let rtt = start.elapsed().as_millis() as u64;
            match result {
                Ok(got) => {
                    tracing::debug!(
                        rtt,
                        dns = %resolver,
                        reply = %reply_string(&got.reply),
                        remark = %got.label,
                        "query result"
                    );
                    let _ = tx.try_send(LookupResult::new(got.reply, resolver));
                }
                Err(e) => errs.add(format!("dns:{},rtt:{rtt}ms,err:{e}", resolver.addr())),
            }
        });
    }

    Race {
        rx,
        errs,
        deadline,
        within,
        empty: resolvers.is_empty(),
    }
}

impl Race {
    /// First error-free reply, or why there is none.
    pub async fn wait(mut self) -> Result<LookupResult, RaceError> {
        if self.empty {
            return Err(RaceError::NoResolvers);
        }
        match tokio::time::timeout_at(self.deadline, self.rx.recv()).await {
            Ok(Some(result)) => Ok(result),
            Ok(None) => Err(RaceError::AllFailed(self.errs.take())),
            Err(_) => Err(RaceError::Timeout(self.within)),
        }
    }
}

/// Start a race and wait for it.
pub async fn lookup_in_resolvers(
    exchanger: &Arc<dyn Exchange>,
    request: &Arc<Message>,
    resolvers: &[Arc<Resolver>],
    within: Duration,
) -> Result<LookupResult, RaceError> {
    start(exchanger, request, resolvers, within).wait().await
}
