use crate::dns::cache::{Lookup, MessageCache};
use crate::dns::pool::UpstreamPool;
use hickory_proto::op::{Message, ResponseCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Per-query deadline; also bounds every upstream dial and exchange.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
/// Idle connections buffered per upstream, and the forward retry budget.
pub const CONNECTIONS_PER_UPSTREAM: usize = 2;
/// Bounded queue of soft-expired queries awaiting re-resolution.
pub const REFRESH_QUEUE_SIZE: usize = 2048;

/// Resolves client queries: cache first, then a parallel race across all
/// upstream pools with the first acceptable answer winning.
pub struct ForwardEngine {
    pools: Vec<Arc<UpstreamPool>>,
    cache: Arc<MessageCache>,
    refresh_queue: mpsc::Sender<Message>,
    exchange_timeout: Duration,
    retries: usize,
}

impl ForwardEngine {
    pub fn new(
        pools: Vec<Arc<UpstreamPool>>,
        cache: Arc<MessageCache>,
        refresh_queue: mpsc::Sender<Message>,
    ) -> Self {
        Self {
            pools,
            cache,
            refresh_queue,
            exchange_timeout: CONNECTION_TIMEOUT,
            retries: CONNECTIONS_PER_UPSTREAM,
        }
    }

    pub fn with_exchange_timeout(mut self, timeout: Duration) -> Self {
        self.exchange_timeout = timeout;
        self
    }

    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Answers one client query. `None` means the caller should synthesize
    /// a SERVFAIL.
    pub async fn answer(&self, query: &Message) -> Option<Message> {
        match self.cache.lookup(query) {
            Lookup::Hit(response) => Some(response),
            Lookup::Stale(response) => {
                // The client gets the stale answer immediately; the refresh
                // happens off the request path.
                self.schedule_refresh(query);
                Some(response)
            }
            Lookup::Miss => self.forward_and_cache(query).await,
        }
    }

    /// Non-blocking enqueue; a full queue drops the refresh. The client
    /// already has its answer, so a lost refresh slot is harmless.
    fn schedule_refresh(&self, query: &Message) {
        if self.refresh_queue.try_send(query.clone()).is_err() {
            debug!("refresh queue full, dropping refresh");
        }
    }

    /// Races the pools, retrying the whole race when no pool produced an
    /// acceptable answer, and writes any winner through the cache.
    pub async fn forward_and_cache(&self, query: &Message) -> Option<Message> {
        for attempt in 0..=self.retries {
            if attempt > 0 {
                debug!(attempt, max = self.retries, question = ?query.queries().first(), "retrying forward");
            }
            if let Some(response) = self.race(query).await {
                self.cache.store(query, &response);
                return Some(response);
            }
        }
        info!(
            question = ?query.queries().first(),
            retries = self.retries,
            "giving up after forward retries"
        );
        None
    }

    /// Spawns one resolve task per pool and takes the first response with an
    /// rcode in {NOERROR, NXDOMAIN}. Results arrive on a channel sized to
    /// the pool count; every task sends exactly one result, so a send can
    /// never block. Losers are aborted, which drops their checked-out
    /// connection mid-read and closes it.
    async fn race(&self, query: &Message) -> Option<Message> {
        let wire = match query.to_vec() {
            Ok(wire) => wire,
            Err(e) => {
                warn!(error = %e, "failed to serialize query for upstream");
                return None;
            }
        };

        let (tx, mut rx) = mpsc::channel::<Option<Message>>(self.pools.len().max(1));
        let mut tasks = Vec::with_capacity(self.pools.len());
        for pool in &self.pools {
            let pool = Arc::clone(pool);
            let wire = wire.clone();
            let tx = tx.clone();
            let timeout = self.exchange_timeout;
            tasks.push(tokio::spawn(async move {
                let result = resolve_once(&pool, &wire, timeout).await;
                let _ = tx.send(result).await;
            }));
        }
        drop(tx);

        let winner = tokio::time::timeout(self.exchange_timeout, async {
            while let Some(result) = rx.recv().await {
                if let Some(response) = result {
                    if acceptable(response.response_code()) {
                        return Some(response);
                    }
                    debug!(
                        rcode = ?response.response_code(),
                        "upstream answer not acceptable, waiting for another pool"
                    );
                }
            }
            None
        })
        .await
        .unwrap_or(None);

        for task in &tasks {
            task.abort();
        }
        winner
    }
}

/// One pool's attempt at resolving the query. Any failure closes the
/// connection by dropping it; only a successfully parsed response returns
/// the connection to the pool.
async fn resolve_once(pool: &UpstreamPool, wire: &[u8], timeout: Duration) -> Option<Message> {
    let mut conn = match pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            debug!(upstream = %pool.endpoint(), error = %e, "failed to obtain upstream connection");
            return None;
        }
    };
    let bytes = match conn.exchange(wire, timeout).await {
        Ok(bytes) => bytes,
        Err(e) => {
            debug!(upstream = %pool.endpoint(), error = %e, "exchange failed, closing connection");
            return None;
        }
    };
    match Message::from_vec(&bytes) {
        Ok(response) => {
            pool.put(conn);
            Some(response)
        }
        Err(e) => {
            debug!(upstream = %pool.endpoint(), error = %e, "unparseable upstream response");
            None
        }
    }
}

fn acceptable(rcode: ResponseCode) -> bool {
    matches!(rcode, ResponseCode::NoError | ResponseCode::NXDomain)
}
