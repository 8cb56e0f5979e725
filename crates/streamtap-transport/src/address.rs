use std::fmt;
use std::str::FromStr;

#[cfg(unix)]
use std::path::PathBuf;

use crate::error::{Result, TransportError};

const TCP_SCHEME: &str = "tcp://";
#[cfg(unix)]
const UNIX_SCHEME: &str = "unix://";

/// A parsed upstream address.
///
/// Accepted forms:
/// - `tcp://host:port`
/// - `host:port` (TCP)
/// - `unix:///path/to.sock` (Unix only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP `host:port` authority, resolved at connect time.
    Tcp(String),
    /// Filesystem path of a Unix domain socket.
    #[cfg(unix)]
    Unix(PathBuf),
}

impl Endpoint {
    /// Parse an address string.
    pub fn parse(address: &str) -> Result<Self> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(invalid(address, "address must not be empty"));
        }

        if let Some(authority) = trimmed.strip_prefix(TCP_SCHEME) {
            return parse_tcp(address, authority);
        }

        #[cfg(unix)]
        if let Some(path) = trimmed.strip_prefix(UNIX_SCHEME) {
            if path.is_empty() {
                return Err(invalid(address, "unix socket path must not be empty"));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }

        if let Some((scheme, _)) = trimmed.split_once("://") {
            return Err(invalid(
                address,
                &format!("unsupported scheme '{scheme}'"),
            ));
        }

        parse_tcp(address, trimmed)
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Endpoint::Tcp(_) => "tcp",
            #[cfg(unix)]
            Endpoint::Unix(_) => "unix-domain-socket",
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(authority) => write!(f, "{TCP_SCHEME}{authority}"),
            #[cfg(unix)]
            Endpoint::Unix(path) => write!(f, "{UNIX_SCHEME}{}", path.display()),
        }
    }
}

fn parse_tcp(address: &str, authority: &str) -> Result<Endpoint> {
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| invalid(address, "expected host:port"))?;

    if host.is_empty() {
        return Err(invalid(address, "host must not be empty"));
    }
    if authority.contains('/') {
        return Err(invalid(address, "tcp address must not contain a path"));
    }
    port.parse::<u16>()
        .map_err(|_| invalid(address, &format!("invalid port '{port}'")))?;

    Ok(Endpoint::Tcp(authority.to_string()))
}

fn invalid(address: &str, reason: &str) -> TransportError {
    TransportError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}
