use std::{collections::BTreeSet, fs, net, path::Path};

use ipnet::Ipv4Net;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    interface::NetworkType,
    packet::auth::{self, AuthKind},
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("cannot parse configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

fn default_true() -> bool {
    true
}
fn default_spf_delay() -> u64 {
    1000
}
fn default_spf_hold_time() -> u64 {
    5000
}
fn default_stub_cost() -> u32 {
    1
}
fn default_metric() -> u16 {
    10
}
fn default_priority() -> u8 {
    1
}
fn default_hello() -> u16 {
    10
}
fn default_dead() -> u32 {
    40
}
fn default_rxmt() -> u16 {
    5
}
fn default_transmit_delay() -> u16 {
    1
}
fn default_mtu() -> u16 {
    crate::IPV4_PACKET_MTU as u16
}
fn default_ext_metric() -> u32 {
    100
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub router_id: net::Ipv4Addr,
    #[serde(default = "default_true")]
    pub fib_coupled: bool,
    /// milliseconds between the first trigger and the computation
    #[serde(default = "default_spf_delay")]
    pub spf_delay: u64,
    /// milliseconds of hold-down after a computation
    #[serde(default = "default_spf_hold_time")]
    pub spf_hold_time: u64,
    #[serde(default)]
    pub redistribute: Vec<RedistributeRule>,
    pub areas: Vec<AreaConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaConfig {
    pub id: net::Ipv4Addr,
    #[serde(default)]
    pub stub: bool,
    #[serde(default = "default_stub_cost")]
    pub stub_default_cost: u32,
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    pub name: String,
    pub address: Ipv4Net,
    #[serde(default)]
    pub network_type: NetworkType,
    #[serde(default = "default_metric")]
    pub metric: u16,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default = "default_hello")]
    pub hello_interval: u16,
    #[serde(default = "default_dead")]
    pub dead_interval: u32,
    #[serde(default = "default_rxmt")]
    pub retransmit_interval: u16,
    #[serde(default = "default_transmit_delay")]
    pub transmit_delay: u16,
    #[serde(default = "default_mtu")]
    pub mtu: u16,
    #[serde(default)]
    pub passive: bool,
    /// static neighbors of an NBMA segment
    #[serde(default)]
    pub neighbors: Vec<net::Ipv4Addr>,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    Simple {
        key: String,
    },
    Crypt {
        keys: Vec<MdKey>,
        key_id: u8,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MdKey {
    pub id: u8,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedistributeKind {
    Static,
    Connected,
    Default,
    Prefix(Ipv4Net),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedistributeRule {
    pub what: RedistributeKind,
    /// a matching negated rule suppresses the route
    #[serde(default)]
    pub no: bool,
    #[serde(default = "default_ext_metric")]
    pub metric: u32,
    #[serde(default = "default_true")]
    pub type2: bool,
    #[serde(default)]
    pub tag: u32,
}

impl AuthConfig {
    pub fn to_kind(&self) -> AuthKind {
        match self {
            AuthConfig::None => AuthKind::None,
            AuthConfig::Simple { key } => AuthKind::Simple(auth::pad_key(key.as_bytes())),
            AuthConfig::Crypt { keys, key_id } => AuthKind::Crypt {
                keys: keys
                    .iter()
                    .map(|k| (k.id, auth::pad_key(k.key.as_bytes())))
                    .collect(),
                key_id: *key_id,
            },
        }
    }
}

/// what a reload does to one interface
#[derive(Debug, Clone, PartialEq)]
pub enum InterfaceChange {
    Added {
        area: net::Ipv4Addr,
        config: InterfaceConfig,
    },
    Removed {
        name: String,
    },
    /// identity changed (area, address, type, mtu or the area's stub flag), tear down and start over
    Restart {
        area: net::Ipv4Addr,
        config: InterfaceConfig,
    },
    /// timers, metric, priority, passive flag, neighbors or keys
    Update {
        config: InterfaceConfig,
    },
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.router_id.is_unspecified() {
            return Err(ConfigError::Invalid("router_id must not be 0.0.0.0".into()));
        }
        if self.areas.is_empty() {
            return Err(ConfigError::Invalid("at least one area is required".into()));
        }
        let mut areas = BTreeSet::new();
        let mut names = BTreeSet::new();
        for area in &self.areas {
            if !areas.insert(area.id) {
                return Err(ConfigError::Invalid(format!("area {} defined twice", area.id)));
            }
            if area.stub && area.id.is_unspecified() {
                return Err(ConfigError::Invalid("the backbone cannot be a stub area".into()));
            }
            for iface in &area.interfaces {
                if !names.insert(iface.name.as_str()) {
                    return Err(ConfigError::Invalid(format!("interface {} configured twice", iface.name)));
                }
                iface.validate()?;
            }
        }
        Ok(())
    }

    pub fn interfaces(&self) -> impl Iterator<Item = (&AreaConfig, &InterfaceConfig)> {
        self.areas
            .iter()
            .flat_map(|area| area.interfaces.iter().map(move |iface| (area, iface)))
    }

    pub fn area(&self, id: net::Ipv4Addr) -> Option<&AreaConfig> {
        self.areas.iter().find(|area| area.id == id)
    }

    /// reject reloads that cannot be applied to a running router
    pub fn check_reload(&self, running: &Config) -> Result<(), ConfigError> {
        if self.router_id != running.router_id {
            return Err(ConfigError::Invalid(
                "changing the router id requires a restart".into(),
            ));
        }
        Ok(())
    }

    /// # diff
    /// per interface changes that turn `self` into `new`
    pub fn diff(&self, new: &Config) -> Vec<InterfaceChange> {
        let mut changes = Vec::new();
        for (_, old) in self.interfaces() {
            if !new.interfaces().any(|(_, iface)| iface.name == old.name) {
                changes.push(InterfaceChange::Removed {
                    name: old.name.clone(),
                });
            }
        }
        for (new_area, iface) in new.interfaces() {
            let Some((old_area, old)) = self.interfaces().find(|(_, o)| o.name == iface.name)
            else {
                changes.push(InterfaceChange::Added {
                    area: new_area.id,
                    config: iface.clone(),
                });
                continue;
            };
            if old == iface && old_area.id == new_area.id && old_area.stub == new_area.stub {
                continue;
            }
            let restart = old_area.id != new_area.id
                || old_area.stub != new_area.stub
                || old.address != iface.address
                || old.network_type != iface.network_type
                || old.mtu != iface.mtu;
            if restart {
                changes.push(InterfaceChange::Restart {
                    area: new_area.id,
                    config: iface.clone(),
                });
            } else {
                changes.push(InterfaceChange::Update {
                    config: iface.clone(),
                });
            }
        }
        changes
    }
}

impl InterfaceConfig {
    fn invalid(&self, msg: String) -> ConfigError {
        ConfigError::Invalid(format!("{}: {}", self.name, msg))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.hello_interval == 0 || self.retransmit_interval == 0 {
            return Err(self.invalid("intervals must be at least one second".into()));
        }
        if self.dead_interval <= self.hello_interval as u32 {
            return Err(self.invalid("dead interval must exceed the hello interval".into()));
        }
        if self.metric == 0 {
            return Err(self.invalid("metric must be at least 1".into()));
        }
        match &self.auth {
            AuthConfig::None => {}
            AuthConfig::Simple { key } => {
                if key.len() > auth::SIMPLE_KEY_LEN {
                    return Err(self.invalid("simple key longer than 8 bytes".into()));
                }
            }
            AuthConfig::Crypt { keys, key_id } => {
                if keys.iter().any(|k| k.key.len() > auth::MD5_DIGEST_LEN) {
                    return Err(self.invalid("md5 key longer than 16 bytes".into()));
                }
                if !keys.iter().any(|k| k.id == *key_id) {
                    return Err(self.invalid(format!("active key id {} not configured", key_id)));
                }
            }
        }
        Ok(())
    }
}
