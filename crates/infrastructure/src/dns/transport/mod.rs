pub mod tls;

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use veil_dns_domain::DomainError;

pub use tls::{DotConnection, TlsDialer};

const MAX_MESSAGE_SIZE: usize = 65535;

/// One reusable upstream connection. A failed `exchange` leaves the
/// connection unusable; callers drop it instead of returning it to a pool.
#[async_trait]
pub trait Exchange: Send {
    /// Writes one query and reads one response, both bounded by `timeout`.
    async fn exchange(&mut self, query: &[u8], timeout: Duration) -> Result<Vec<u8>, DomainError>;
}

/// Produces fresh connections for a pool. The trait seam keeps the pool and
/// the engine testable against in-memory upstreams.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self) -> Result<Box<dyn Exchange>, DomainError>;

    /// Human-readable upstream identity for logs.
    fn endpoint(&self) -> String;
}

/// Writes a DNS message with the 2-byte big-endian length prefix used by
/// both DoT (RFC 7858) and plain TCP transport (RFC 1035 §4.2.2).
pub(crate) async fn send_with_length_prefix<S>(
    stream: &mut S,
    message_bytes: &[u8],
) -> Result<(), DomainError>
where
    S: AsyncWriteExt + Unpin,
{
    let length = message_bytes.len() as u16;
    stream
        .write_all(&length.to_be_bytes())
        .await
        .map_err(|e| DomainError::IoError(format!("failed to write length prefix: {}", e)))?;
    stream
        .write_all(message_bytes)
        .await
        .map_err(|e| DomainError::IoError(format!("failed to write DNS message: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| DomainError::IoError(format!("failed to flush stream: {}", e)))?;
    Ok(())
}

/// Reads one length-prefixed DNS message.
pub(crate) async fn read_with_length_prefix<S>(stream: &mut S) -> Result<Vec<u8>, DomainError>
where
    S: AsyncReadExt + Unpin,
{
    let mut len_buf = [0u8; 2];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| DomainError::IoError(format!("failed to read message length: {}", e)))?;

    let message_len = u16::from_be_bytes(len_buf) as usize;
    if message_len > MAX_MESSAGE_SIZE {
        return Err(DomainError::IoError(format!(
            "message too large: {} bytes (max {})",
            message_len, MAX_MESSAGE_SIZE
        )));
    }

    let mut message = vec![0u8; message_len];
    stream
        .read_exact(&mut message)
        .await
        .map_err(|e| DomainError::IoError(format!("failed to read message body: {}", e)))?;
    Ok(message)
}
