use std::fmt;
use std::net::SocketAddr;
use serde::{Serialize, Deserialize};

pub type Id = u32;

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Identity {
    pub label: String,
    // Bare host, or host:port to override the fleet-wide status port.
    pub address: String,
    pub id: Id
}

impl Identity {
    pub fn new(label: &str, address: &str, id: Id) -> Self {
        Self {
            label: String::from(label),
            address: String::from(address),
            id
        }
    }

    pub fn endpoint(&self, port: u16) -> String {
        match self.address.parse::<SocketAddr>() {
            Ok(addr) => addr.to_string(),
            Err(_) => format!("{}:{}", self.address, port)
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.label, self.id)
    }
}

// Roster used when the config names no nodes.
pub fn default_roster() -> Vec<Identity> {
    Vec::from([
        Identity::new("Tokyo", "18.179.143.193", 1),
        Identity::new("London", "52.56.118.10", 2),
        Identity::new("Singapore", "13.228.206.188", 3),
        Identity::new("Mumbai", "13.232.96.221", 4),
        Identity::new("Frankfort", "18.184.239.232", 5),
        Identity::new("Seoul", "13.124.172.86", 6),
        Identity::new("Montreal", "52.60.163.60", 7),
    ])
}
