use crate::errors::DomainError;
use crate::upstream::UpstreamSpec;
use serde::Serialize;

/// Hard floor for the cacheable TTL; the `min_ttl` setting cannot go below it.
pub const ABSOLUTE_MIN_TTL: u32 = 60;
/// Maximum TTL, 2^31 - 1 seconds per RFC 1035.
pub const ABSOLUTE_MAX_TTL: u32 = 2_147_483_647;

/// Cache entries held when no size is configured.
pub const DEFAULT_CACHE_SIZE: usize = 65536;

pub const DEFAULT_UPSTREAMS: &str = "one.one.one.one:853@1.1.1.1,dns.google:853@8.8.8.8";

/// Validated runtime configuration for the forwarder.
#[derive(Debug, Clone, Serialize)]
pub struct ForwarderConfig {
    /// Listen address for the UDP and TCP DNS endpoints.
    pub listen: String,
    #[serde(serialize_with = "serialize_upstreams")]
    pub upstreams: Vec<UpstreamSpec>,
    /// Cache capacity in entries; 0 disables the cache entirely.
    pub cache_size: usize,
    pub min_ttl: u32,
    pub evict_metrics: bool,
    pub debug_port: Option<u16>,
}

fn serialize_upstreams<S>(specs: &[UpstreamSpec], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_seq(specs.iter().map(|s| s.to_string()))
}

impl ForwarderConfig {
    /// Builds a validated config from raw CLI inputs.
    ///
    /// `cache_size` follows the historical convention: 0 means "use the
    /// default", a negative value disables caching.
    pub fn from_args(
        listen: &str,
        upstreams: &str,
        cache_size: i64,
        min_ttl: u32,
        evict_metrics: bool,
        debug_port: Option<u16>,
    ) -> Result<Self, DomainError> {
        let upstreams = UpstreamSpec::parse_list(upstreams)?;
        let listen = normalize_listen_addr(listen)?;
        let cache_size = match cache_size {
            0 => DEFAULT_CACHE_SIZE,
            n if n < 0 => 0,
            n => n as usize,
        };
        Ok(Self {
            listen,
            upstreams,
            cache_size,
            min_ttl: min_ttl.clamp(ABSOLUTE_MIN_TTL, ABSOLUTE_MAX_TTL),
            evict_metrics,
            debug_port,
        })
    }
}

/// Accepts `host:port` or a bare `:port` (all interfaces), mirroring the
/// conventional `-a :53` flag form.
fn normalize_listen_addr(addr: &str) -> Result<String, DomainError> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(DomainError::ConfigError("listen address is empty".to_string()));
    }
    if let Some(port) = addr.strip_prefix(':') {
        port.parse::<u16>()
            .map_err(|_| DomainError::ConfigError(format!("invalid listen port in '{}'", addr)))?;
        return Ok(format!("0.0.0.0:{}", port));
    }
    match addr.parse::<std::net::SocketAddr>() {
        Ok(_) => Ok(addr.to_string()),
        Err(_) => Err(DomainError::ConfigError(format!(
            "invalid listen address '{}'",
            addr
        ))),
    }
}
