use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DomainError {
    #[error("Invalid upstream spec '{0}'")]
    InvalidUpstreamSpec(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cache capacity {0} not supported")]
    CacheCapacity(usize),

    #[error("Invalid DNS message: {0}")]
    InvalidDnsMessage(String),

    #[error("Invalid TLS hostname '{0}'")]
    InvalidTlsHostname(String),

    #[error("TLS handshake failed with {server}: {reason}")]
    TlsHandshake { server: String, reason: String },

    #[error("Transport timeout connecting to {server}")]
    TransportTimeout { server: String },

    #[error("Transport connection refused by {server}: {reason}")]
    TransportConnectionRefused { server: String, reason: String },

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Connection pool is shut down")]
    PoolClosed,

    #[error("Failed to bind {addr}: {reason}")]
    BindFailure { addr: String, reason: String },
}
