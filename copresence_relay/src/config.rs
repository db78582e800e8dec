// Configuration for the relay server and the client sync engine.
//
// The server address is a URL-like string (`https://localhost:7777`,
// `10.0.0.5:7878`, or a bare hostname). `Endpoint::parse` never fails:
// anything unusable falls back to the default endpoint with a warning, so a
// bad config string degrades to the default bind rather than aborting
// startup. Loopback hostnames bind the wildcard address on the server side
// so local clients on other interfaces can still reach it.
//
// Both config structs load from a JSON file and are overridable by CLI
// flags in `main.rs`.

use std::fs;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::path::Path;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default port for the reliable channel. The unreliable channel always
/// binds the reliable port + 1.
pub const DEFAULT_PORT: u16 = 7777;

pub const DEFAULT_SERVER_URL: &str = "https://localhost:7777";

/// Parsed host + reliable-channel port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse a URL-like address string. Accepts `scheme://host:port`,
    /// `host:port`, and bare `host` (port defaults to `DEFAULT_PORT`).
    /// Falls back to `localhost:DEFAULT_PORT` on anything unusable.
    pub fn parse(url: &str) -> Self {
        match Self::parse_inner(url) {
            Some(ep) => ep,
            None => {
                warn!("unusable server address {url:?}, falling back to defaults");
                Self {
                    host: "localhost".into(),
                    port: DEFAULT_PORT,
                }
            }
        }
    }

    fn parse_inner(url: &str) -> Option<Self> {
        let rest = match url.find("://") {
            Some(i) => &url[i + 3..],
            None => url,
        };
        // Drop any path component.
        let rest = rest.split('/').next()?;
        if rest.is_empty() {
            return None;
        }
        match rest.rsplit_once(':') {
            Some((host, port)) => {
                if host.is_empty() {
                    return None;
                }
                let port: u16 = port.parse().ok()?;
                Some(Self {
                    host: host.to_owned(),
                    port,
                })
            }
            None => Some(Self {
                host: rest.to_owned(),
                port: DEFAULT_PORT,
            }),
        }
    }

    /// Bind address for the server side. Loopback hosts widen to the
    /// wildcard address; other hostnames resolve via DNS, falling back to
    /// the wildcard when resolution fails.
    pub fn bind_ip(&self) -> IpAddr {
        if self.host == "localhost" || self.host == "127.0.0.1" {
            return IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        }
        match (self.host.as_str(), 0u16).to_socket_addrs() {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => addr.ip(),
                None => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            },
            Err(e) => {
                warn!("could not resolve {:?} ({e}), binding wildcard", self.host);
                IpAddr::V4(Ipv4Addr::UNSPECIFIED)
            }
        }
    }
}

/// Relay server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// URL-like listen address; port P for the reliable channel, P+1 for
    /// the unreliable one.
    pub server_url: String,
    /// Fixed session id. `None` generates a fresh one at startup.
    pub session_id: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            session_id: None,
        }
    }
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Client sync engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// URL-like server address to connect to.
    pub server_url: String,
    /// Minimum milliseconds between pose broadcasts. 0 broadcasts on every
    /// `update()` call.
    pub pose_interval_ms: u64,
    /// Reconciliation smoothing factor in [0, 1]. 0 snaps to received poses
    /// immediately; higher values converge more slowly.
    pub smoothing: f32,
    /// Keep pose updates echoed back with our own user id instead of
    /// discarding them.
    pub accept_own_poses: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.into(),
            pose_interval_ms: 100,
            smoothing: 0.5,
            accept_own_poses: false,
        }
    }
}

impl SyncConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}
