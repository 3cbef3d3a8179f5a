use crate::dns::transport::{Dialer, Exchange};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;
use veil_dns_domain::DomainError;

/// Bounded buffer of ready connections to one upstream.
///
/// Connections are dialed lazily and reused across queries to amortize the
/// TLS handshake. There is no health check: a connection that fails I/O is
/// dropped by its borrower instead of being returned.
pub struct UpstreamPool {
    dialer: Arc<dyn Dialer>,
    capacity: usize,
    state: Mutex<PoolState>,
}

struct PoolState {
    closed: bool,
    idle: Vec<Box<dyn Exchange>>,
}

impl UpstreamPool {
    pub fn new(capacity: usize, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            dialer,
            capacity,
            state: Mutex::new(PoolState {
                closed: false,
                idle: Vec::with_capacity(capacity),
            }),
        }
    }

    /// Returns a buffered connection if any, dialing a new one otherwise.
    /// Dialing happens outside the lock.
    pub async fn get(&self) -> Result<Box<dyn Exchange>, DomainError> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(DomainError::PoolClosed);
            }
            if let Some(conn) = state.idle.pop() {
                return Ok(conn);
            }
        }
        self.dialer.dial().await
    }

    /// Returns a connection to the buffer; drops it when the buffer is full
    /// or the pool has shut down. Dropping closes the underlying stream.
    pub fn put(&self, conn: Box<dyn Exchange>) {
        let mut state = self.state.lock();
        if state.closed || state.idle.len() >= self.capacity {
            return;
        }
        state.idle.push(conn);
    }

    /// Marks the pool closed and drains the buffer. Subsequent `get`s fail
    /// and `put`s drop their connection.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        let drained = state.idle.len();
        state.idle.clear();
        debug!(upstream = %self.dialer.endpoint(), drained, "pool shut down");
    }

    pub fn endpoint(&self) -> String {
        self.dialer.endpoint()
    }
}
