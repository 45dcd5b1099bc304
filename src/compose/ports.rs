//! Port binding parsing and conflict detection

use super::config::{PortConfig, PortConfigLong};
use crate::error::{BerthError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Network protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Some(Protocol::Tcp),
            "udp" => Some(Protocol::Udp),
            "sctp" => Some(Protocol::Sctp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

/// Inclusive port range; a single port has `start == end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self { start: port, end: port }
    }

    fn parse(s: &str, spec: &str) -> Result<Self> {
        let (start, end) = match s.split_once('-') {
            Some((a, b)) => (parse_port(a, spec)?, parse_port(b, spec)?),
            None => {
                let p = parse_port(s, spec)?;
                (p, p)
            }
        };

        if start > end {
            return Err(port_error(spec, format!("range {} is reversed", s)));
        }

        Ok(Self { start, end })
    }

    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// A parsed port binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortBinding {
    /// Host interface; `None` binds every interface
    pub host_ip: Option<IpAddr>,
    /// Host port(s); `None` lets the runtime pick an ephemeral port
    pub published: Option<PortRange>,
    /// Container port(s)
    pub target: PortRange,
    pub protocol: Protocol,
}

/// A single host-side port claim
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct HostPort {
    pub ip: Option<IpAddr>,
    pub port: u16,
    pub protocol: Protocol,
}

impl HostPort {
    /// Whether two claims would compete for the same socket
    pub fn conflicts_with(&self, other: &HostPort) -> bool {
        if self.port != other.port || self.protocol != other.protocol {
            return false;
        }

        match (self.ip, other.ip) {
            (None, _) | (_, None) => true,
            (Some(a), Some(b)) => {
                a == b || (a.is_ipv4() == b.is_ipv4() && (a.is_unspecified() || b.is_unspecified()))
            }
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ip {
            Some(IpAddr::V6(ip)) => write!(f, "[{}]:{}/{}", ip, self.port, self.protocol),
            Some(ip) => write!(f, "{}:{}/{}", ip, self.port, self.protocol),
            None => write!(f, "{}/{}", self.port, self.protocol),
        }
    }
}

impl PortBinding {
    /// Parse the short syntax, e.g. `127.0.0.1:8000:8000/tcp`
    pub fn parse(spec: &str) -> Result<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(port_error(spec, "empty specification"));
        }

        let (body, protocol) = match trimmed.rsplit_once('/') {
            Some((body, proto)) => (
                body,
                Protocol::parse(proto)
                    .ok_or_else(|| port_error(spec, format!("unknown protocol '{}'", proto)))?,
            ),
            None => (trimmed, Protocol::Tcp),
        };

        let (host_ip, rest) = if let Some(stripped) = body.strip_prefix('[') {
            let (ip, rest) = stripped
                .split_once(']')
                .ok_or_else(|| port_error(spec, "unterminated IPv6 address"))?;
            let rest = rest
                .strip_prefix(':')
                .ok_or_else(|| port_error(spec, "expected ':' after IPv6 address"))?;
            (Some(parse_ip(ip, spec)?), rest)
        } else {
            let parts: Vec<&str> = body.split(':').collect();
            match parts.len() {
                1 | 2 => (None, body),
                3 => {
                    let ip_len = parts[0].len();
                    (Some(parse_ip(parts[0], spec)?), &body[ip_len + 1..])
                }
                _ => return Err(port_error(spec, "too many ':' separators")),
            }
        };

        let (published, target) = match rest.split_once(':') {
            Some((host, container)) => {
                let published = if host.is_empty() {
                    None
                } else {
                    Some(PortRange::parse(host, spec)?)
                };
                (published, PortRange::parse(container, spec)?)
            }
            None => {
                if host_ip.is_some() {
                    return Err(port_error(spec, "missing container port"));
                }
                (None, PortRange::parse(rest, spec)?)
            }
        };

        Self::checked(spec, host_ip, published, target, protocol)
    }

    /// Build from any of the compose port syntaxes
    pub fn from_config(config: &PortConfig) -> Result<Self> {
        match config {
            PortConfig::Number(n) => {
                let spec = n.to_string();
                let port = parse_port(&spec, &spec)?;
                Ok(Self {
                    host_ip: None,
                    published: None,
                    target: PortRange::single(port),
                    protocol: Protocol::Tcp,
                })
            }
            PortConfig::Short(s) => Self::parse(s),
            PortConfig::Long(long) => Self::from_long(long),
        }
    }

    fn from_long(long: &PortConfigLong) -> Result<Self> {
        let spec = format!("target={}", long.target);
        let target = PortRange::single(parse_port(&long.target.to_string(), &spec)?);

        let published = match &long.published {
            Some(p) => {
                let text = p.to_string();
                if text.is_empty() {
                    None
                } else {
                    Some(PortRange::parse(&text, &spec)?)
                }
            }
            None => None,
        };

        let host_ip = match long.host_ip.as_deref() {
            Some(ip) if !ip.is_empty() => Some(parse_ip(ip.trim_matches(|c| c == '[' || c == ']'), &spec)?),
            _ => None,
        };

        let protocol = match long.protocol.as_deref() {
            Some(p) => Protocol::parse(p)
                .ok_or_else(|| port_error(&spec, format!("unknown protocol '{}'", p)))?,
            None => Protocol::Tcp,
        };

        Self::checked(&spec, host_ip, published, target, protocol)
    }

    fn checked(
        spec: &str,
        host_ip: Option<IpAddr>,
        published: Option<PortRange>,
        target: PortRange,
        protocol: Protocol,
    ) -> Result<Self> {
        if let Some(published) = published {
            if published.len() != target.len() {
                return Err(port_error(
                    spec,
                    format!(
                        "host range {} and container range {} differ in length",
                        published, target
                    ),
                ));
            }
        }

        Ok(Self {
            host_ip,
            published,
            target,
            protocol,
        })
    }

    /// Host-side claims made by this binding. Ephemeral bindings claim nothing.
    pub fn host_ports(&self) -> Vec<HostPort> {
        match self.published {
            Some(range) => range
                .ports()
                .map(|port| HostPort {
                    ip: self.host_ip,
                    port,
                    protocol: self.protocol,
                })
                .collect(),
            None => Vec::new(),
        }
    }

    /// Pairs of (host port, container port)
    pub fn mappings(&self) -> Vec<(Option<u16>, u16)> {
        match self.published {
            Some(range) => range.ports().map(Some).zip(self.target.ports()).collect(),
            None => self.target.ports().map(|p| (None, p)).collect(),
        }
    }
}

impl fmt::Display for PortBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host_ip {
            Some(IpAddr::V6(ip)) => write!(f, "[{}]:", ip)?,
            Some(ip) => write!(f, "{}:", ip)?,
            None => {}
        }
        match self.published {
            Some(range) => write!(f, "{}:", range)?,
            None if self.host_ip.is_some() => write!(f, ":")?,
            None => {}
        }
        write!(f, "{}/{}", self.target, self.protocol)
    }
}

fn parse_port(s: &str, spec: &str) -> Result<u16> {
    let value: u32 = s
        .trim()
        .parse()
        .map_err(|_| port_error(spec, format!("'{}' is not a port number", s)))?;
    if value == 0 || value > u16::MAX as u32 {
        return Err(port_error(spec, format!("port {} out of range 1-65535", value)));
    }
    Ok(value as u16)
}

fn parse_ip(s: &str, spec: &str) -> Result<IpAddr> {
    s.parse()
        .map_err(|_| port_error(spec, format!("'{}' is not an IP address", s)))
}

fn port_error(spec: &str, reason: impl Into<String>) -> BerthError {
    BerthError::Port {
        spec: spec.to_string(),
        reason: reason.into(),
    }
}
