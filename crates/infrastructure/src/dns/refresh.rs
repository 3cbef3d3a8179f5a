use crate::dns::engine::ForwardEngine;
use hickory_proto::op::Message;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Background re-resolution of soft-expired cache entries.
///
/// A single long-lived task drains the bounded refresh queue and drives the
/// same forward-and-cache path a cache miss takes, without any client
/// waiting on the result.
pub struct RefreshWorker {
    engine: Arc<ForwardEngine>,
    queue: mpsc::Receiver<Message>,
    shutdown: CancellationToken,
}

impl RefreshWorker {
    pub fn new(
        engine: Arc<ForwardEngine>,
        queue: mpsc::Receiver<Message>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            queue,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("refresh worker: shutting down");
                    break;
                }
                query = self.queue.recv() => {
                    let Some(query) = query else {
                        break;
                    };
                    debug!(question = ?query.queries().first(), "refreshing soft-expired entry");
                    let _ = self.engine.forward_and_cache(&query).await;
                }
            }
        }
    }
}
