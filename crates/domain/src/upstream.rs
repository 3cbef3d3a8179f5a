use crate::errors::DomainError;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;

/// One DNS-over-TLS upstream: `host:port` or `host:port@ip`.
///
/// The hostname is always the TLS server name. When `@ip` is present the
/// TCP connection goes to `ip:port` and the hostname is SNI only; otherwise
/// the hostname is also the dial target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UpstreamSpec {
    pub hostname: Arc<str>,
    pub port: u16,
    pub ip: Option<IpAddr>,
}

impl UpstreamSpec {
    pub fn new(hostname: &str, port: u16, ip: Option<IpAddr>) -> Self {
        Self {
            hostname: hostname.into(),
            port,
            ip,
        }
    }

    /// Parses a comma-separated upstream list, rejecting empty input.
    pub fn parse_list(list: &str) -> Result<Vec<UpstreamSpec>, DomainError> {
        let specs = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(UpstreamSpec::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        if specs.is_empty() {
            return Err(DomainError::ConfigError(
                "upstream server list is empty".to_string(),
            ));
        }
        Ok(specs)
    }
}

fn parse_host_port(s: &str) -> Option<(&str, u16)> {
    if s.starts_with('[') {
        let end = s.find(']')?;
        let host = &s[1..end];
        let port_str = s[end + 1..].strip_prefix(':')?;
        let port = port_str.parse::<u16>().ok()?;
        Some((host, port))
    } else {
        let (host, port_str) = s.rsplit_once(':')?;
        let port = port_str.parse::<u16>().ok()?;
        Some((host, port))
    }
}

impl FromStr for UpstreamSpec {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host_port, ip) = match s.split_once('@') {
            Some((hp, ip_str)) => {
                let ip = ip_str
                    .parse::<IpAddr>()
                    .map_err(|_| DomainError::InvalidUpstreamSpec(s.to_string()))?;
                (hp, Some(ip))
            }
            None => (s, None),
        };
        let (host, port) =
            parse_host_port(host_port).ok_or_else(|| DomainError::InvalidUpstreamSpec(s.to_string()))?;
        if host.is_empty() {
            return Err(DomainError::InvalidUpstreamSpec(s.to_string()));
        }
        Ok(UpstreamSpec {
            hostname: host.into(),
            port,
            ip,
        })
    }
}

impl fmt::Display for UpstreamSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(ip) => write!(f, "{}:{}@{}", self.hostname, self.port, ip),
            None => write!(f, "{}:{}", self.hostname, self.port),
        }
    }
}
