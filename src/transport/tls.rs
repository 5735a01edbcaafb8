//! Broker endpoint parsing and TLS transport selection.
//!
//! Accepted address forms:
//! - `host:port`, `[ipv6]:port`
//! - `mqtt://` / `tcp://` (plain), `mqtts://` / `ssl://` (TLS)

use anyhow::{anyhow, Context, Result};
use rumqttc::Transport;
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl BrokerEndpoint {
    /// `force_tls` turns TLS on for scheme-less addresses; a plain scheme
    /// combined with `force_tls` still uses TLS.
    pub fn parse(addr: &str, force_tls: bool) -> Result<Self> {
        let trimmed = addr.trim();
        let (use_tls, rest) = match trimmed.split_once("://") {
            Some(("mqtt" | "tcp", rest)) => (force_tls, rest),
            Some(("mqtts" | "ssl", rest)) => (true, rest),
            Some((scheme, _)) => return Err(anyhow!("unsupported broker scheme '{}'", scheme)),
            None => (force_tls, trimmed),
        };
        let (host, port) = split_host_port(rest)?;
        if host.is_empty() {
            return Err(anyhow!("missing broker host in {}", addr));
        }
        Ok(Self {
            host,
            port,
            use_tls,
        })
    }

    pub fn is_loopback(&self) -> bool {
        if self.host.eq_ignore_ascii_case("localhost") {
            return true;
        }
        self.host
            .parse::<std::net::IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
    }

    /// Remote brokers must be opted into explicitly.
    pub fn require_loopback(&self, allow_remote: bool) -> Result<()> {
        if self.is_loopback() {
            return Ok(());
        }
        if allow_remote {
            log::warn!(
                "remote broker {}:{} enabled; the command topic is writable by anyone on that broker",
                self.host,
                self.port
            );
            return Ok(());
        }
        Err(anyhow!(
            "broker {}:{} is not loopback (use --allow-remote-mqtt to override)",
            self.host,
            self.port
        ))
    }

    pub fn transport(&self, tls: &TlsMaterials) -> Result<Transport> {
        if !self.use_tls {
            if tls.is_configured() {
                return Err(anyhow!(
                    "TLS certificates were given but the broker address is plain TCP; \
                     use mqtts:// or --mqtt-use-tls"
                ));
            }
            return Ok(Transport::tcp());
        }
        match (&tls.ca, &tls.client_auth) {
            (None, None) => Ok(Transport::tls_with_default_config()),
            (Some(ca), auth) => Ok(Transport::tls(ca.clone(), auth.clone(), None)),
            (None, Some(_)) => Err(anyhow!(
                "a CA certificate is required when a client certificate is configured"
            )),
        }
    }
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("unterminated IPv6 address in {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing broker port in {}", addr))?;
        (host, port)
    } else {
        addr.rsplit_once(':')
            .ok_or_else(|| anyhow!("missing broker port in {}", addr))?
    };
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid broker port in {}", addr))?;
    Ok((host.to_string(), port))
}

/// PEM material for TLS connections. With nothing configured the platform
/// roots are used.
#[derive(Clone, Debug, Default)]
pub struct TlsMaterials {
    pub ca: Option<Vec<u8>>,
    pub client_auth: Option<(Vec<u8>, Vec<u8>)>,
}

impl TlsMaterials {
    pub fn load(ca: Option<&Path>, cert: Option<&Path>, key: Option<&Path>) -> Result<Self> {
        let ca = ca.map(|path| read_pem(path, "CA certificate")).transpose()?;
        let client_auth = match (cert, key) {
            (Some(cert), Some(key)) => Some((
                read_pem(cert, "client certificate")?,
                read_pem(key, "client key")?,
            )),
            (None, None) => None,
            (Some(_), None) => return Err(anyhow!("client certificate provided without key")),
            (None, Some(_)) => return Err(anyhow!("client key provided without certificate")),
        };
        Ok(Self { ca, client_auth })
    }

    pub fn is_configured(&self) -> bool {
        self.ca.is_some() || self.client_auth.is_some()
    }
}

fn read_pem(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {} '{}'", what, path.display()))
}
