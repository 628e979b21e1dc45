//! Node addresses and their credentials.

use std::fmt;
use std::str::FromStr;

use crate::error::ClusterError;

/// Address of a cluster node plus the password used to reach it.
///
/// Seeds are given in this form at configuration time. Nodes found by
/// discovery inherit the password of the seed that reported them.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            password: None,
        }
    }

    pub fn with_password(mut self, password: Option<String>) -> Self {
        self.password = password.filter(|p| !p.is_empty());
        self
    }

    /// `host:port`, with IPv6 hosts in brackets.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Canonical identity: `password@host:port`, or `host:port` without a
    /// password. Two descriptors with the same key are the same node.
    pub fn identity_key(&self) -> String {
        match self.password.as_deref() {
            Some(pw) if !pw.is_empty() => format!("{pw}@{}", self.addr()),
            _ => self.addr(),
        }
    }
}

/// Splits `host:port` on the last colon, removing IPv6 brackets.
pub(crate) fn split_host_port(addr: &str) -> Option<(&str, u16)> {
    let (host, port) = addr.rsplit_once(':')?;
    let port = port.parse().ok()?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    Some((host, port))
}

impl FromStr for Endpoint {
    type Err = ClusterError;

    /// Parses `host:port`, `password@host:port` or `[v6]:port`. The
    /// password is everything before the last `@`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (password, addr) = match s.rsplit_once('@') {
            Some((pw, addr)) => (Some(pw.to_owned()), addr),
            None => (None, s),
        };
        let (host, port) = split_host_port(addr)
            .filter(|(host, _)| !host.is_empty())
            .ok_or_else(|| ClusterError::Configuration(format!("invalid seed address '{s}'")))?;
        Ok(Endpoint::new(host, port).with_password(password))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.addr())
    }
}

// keeps passwords out of logs
impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}
