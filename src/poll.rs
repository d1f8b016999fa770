use std::time::Duration;
use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::node;

pub const DEFAULT_PORT: u16 = 30310;
pub const DEFAULT_COMMAND: &str = "checkredis.sh";

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Error)]
pub enum Error {
    #[error("timed out")]
    Timeout,
    #[error("connection refused")]
    ConnectionRefused,
    #[error("{0}")]
    Other(String)
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Timeout
        } else if e.is_connect() {
            Error::ConnectionRefused
        } else {
            Error::Other(e.to_string())
        }
    }
}

// Asks a node's script endpoint to run the status command and hands back the
// raw text. No retries: a failure just means no report this round.
#[derive(Debug, Clone)]
pub struct Poller {
    client: reqwest::Client,
    port: u16,
    command: String
}

impl Poller {
    pub fn new(port: u16, command: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            port,
            command: String::from(command)
        }
    }

    pub fn url(&self, node: &node::Identity) -> String {
        format!("http://{}/scripts", node.endpoint(self.port))
    }

    pub async fn poll(&self, node: &node::Identity, timeout: Duration) -> Result<String, Error> {
        let resp = self.client
            .post(self.url(node))
            .form(&[("cmd", self.command.as_str())])
            .timeout(timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Other(format!("status {}", status)));
        }
        Ok(resp.text().await?)
    }
}

impl Default for Poller {
    fn default() -> Self {
        Self::new(DEFAULT_PORT, DEFAULT_COMMAND)
    }
}
