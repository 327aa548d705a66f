//
// Typed configuration surface (spec.md Non-goals: no config file grammar
// or templating — only the typed structs a reload mutates). Loaded from
// JSON via serde_json rather than holo-bgp's YANG-backed
// northbound::configuration (northbound/configuration.rs), whose
// `InstanceCfg`/`NeighborCfg` shape this mirrors minus the YANG plumbing.
//

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::packet::nlri::Family;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    pub instance: InstanceConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct InstanceConfig {
    pub identifier: Ipv4Addr,
    pub asn: u32,
    #[serde(default)]
    pub neighbors: Vec<NeighborConfig>,
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
}

fn default_hold_time() -> u16 {
    180
}

fn default_connect_retry() -> u16 {
    120
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct NeighborConfig {
    pub address: IpAddr,
    pub remote_as: u32,
    pub local_as: Option<u32>,
    #[serde(default = "default_hold_time")]
    pub hold_time: u16,
    #[serde(default = "default_connect_retry")]
    pub connect_retry_time: u16,
    /// Never initiate the TCP connection; only accept.
    #[serde(default)]
    pub passive: bool,
    pub md5_password: Option<String>,
    /// GTSM: minimum acceptable incoming TTL.
    pub ttl_security_hops: Option<u8>,
    #[serde(default)]
    pub families: Vec<Family>,
    #[serde(default)]
    pub addpath_send: Vec<Family>,
    #[serde(default)]
    pub addpath_receive: Vec<Family>,
    pub extended_message: Option<bool>,
    /// Outbound UPDATE rate limit, in messages/second (spec.md §4.G
    /// SUPPLEMENTED FEATURES). `None` disables the limiter.
    pub rate_limit: Option<u32>,
    pub graceful_restart: Option<GracefulRestartConfig>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct GracefulRestartConfig {
    #[serde(with = "duration_secs")]
    pub restart_time: Duration,
    #[serde(with = "duration_secs")]
    pub stale_routes_time: Duration,
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub enum ProcessEncoder {
    #[default]
    Text,
    Json,
}

/// One external-process child (spec.md §4.I): command line, the encoder
/// used for its stdout event stream, and which neighbors it subscribes to.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProcessConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub encoder: ProcessEncoder,
    /// Empty means "subscribed to every neighbor".
    #[serde(default)]
    pub neighbors: Vec<IpAddr>,
    /// Re-spawn the child if it exits (spec.md §3 `ExternalProcess`
    /// lifecycle: "re-spawned on exit if `respawn` is set").
    #[serde(default)]
    pub respawn: bool,
    /// Require one `done`/`error <message>`/`shutdown` reply per command
    /// read from this child's stdout (spec.md §6 Acknowledgement).
    #[serde(default)]
    pub ack: bool,
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> ConfigError {
        ConfigError::Io(e)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> ConfigError {
        ConfigError::Parse(e)
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "failed to read configuration file: {e}"),
            ConfigError::Parse(e) => write!(f, "failed to parse configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_roundtrip() {
        let json = r#"{
            "instance": {
                "identifier": "192.0.2.1",
                "asn": 65001,
                "neighbors": [
                    { "address": "192.0.2.2", "remote_as": 65002 }
                ]
            }
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.instance.neighbors.len(), 1);
        assert_eq!(config.instance.neighbors[0].hold_time, 180);
        assert!(!config.instance.neighbors[0].passive);
    }
}
