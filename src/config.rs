// Monitor configuration. Everything lives in one TOML file: a `[monitor]`
// table with the polling parameters and a `[[nodes]]` array with the fleet
// roster. Every key has a default, and leaving out `[[nodes]]` selects the
// built-in roster.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::info;

use crate::{node, poll, round};

pub const DEFAULT_INTERVAL_MS: u64 = 6_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 3_000;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file at {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error
    },
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("roster is empty, there is nothing to poll")]
    EmptyRoster,
    #[error("node id {0} appears more than once in the roster")]
    DuplicateNode(node::Id),
    #[error("{0} must be positive")]
    ZeroDuration(&'static str),
    #[error("status address {0:?} is not a socket address")]
    BadStatusAddr(String)
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Monitor {
    // Pause between the starts of two rounds.
    pub interval_ms: u64,
    // Per-node request timeout.
    pub timeout_ms: u64,
    // Status port for roster addresses that don't carry one.
    pub port: u16,
    pub command: String,
    pub status_addr: Option<String>,
    // Heights a node may trail the fleet's highest report by before it is
    // left out of comparison as lagging.
    pub max_lag: u64
}

impl Default for Monitor {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_INTERVAL_MS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            port: poll::DEFAULT_PORT,
            command: String::from(poll::DEFAULT_COMMAND),
            status_addr: None,
            max_lag: round::DEFAULT_MAX_LAG
        }
    }
}

impl Monitor {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub monitor: Monitor,
    #[serde(default = "node::default_roster")]
    pub nodes: Vec<node::Identity>
}

impl Default for Config {
    fn default() -> Self {
        Self {
            monitor: Monitor::default(),
            nodes: node::default_roster()
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::FileRead {
            path: path.to_path_buf(),
            source
        })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded {} nodes from {:?}", config.nodes.len(), path);
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, Error> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    // An empty roster is the one condition that stops the monitor from
    // doing anything, so it is rejected up front.
    pub fn validate(&self) -> Result<(), Error> {
        if self.nodes.is_empty() {
            return Err(Error::EmptyRoster);
        }
        let mut seen = BTreeSet::default();
        for node in &self.nodes {
            if !seen.insert(node.id) {
                return Err(Error::DuplicateNode(node.id));
            }
        }
        if self.monitor.interval_ms == 0 {
            return Err(Error::ZeroDuration("interval"));
        }
        if self.monitor.timeout_ms == 0 {
            return Err(Error::ZeroDuration("timeout"));
        }
        if let Some(addr) = &self.monitor.status_addr {
            addr.parse::<SocketAddr>().map_err(|_| Error::BadStatusAddr(addr.clone()))?;
        }
        Ok(())
    }
}
