use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

use crate::{detect, node, poll, report};

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct HeightVerdict {
    pub height: u64,
    pub verdict: detect::Verdict
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum Reason {
    Poll(poll::Error),
    Parse(report::Error)
}

// A roster node that contributed nothing this round.
#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Absence {
    pub node: node::Id,
    pub label: String,
    pub reason: Reason
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Lagging {
    pub node: node::Id,
    pub height: u64
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct Warning {
    pub node: node::Id,
    pub warning: report::Error
}

// Everything one polling round found out.
#[derive(Serialize, Deserialize, PartialEq, Debug, Clone)]
pub struct Record {
    pub cycle: u64,
    pub at: DateTime<Utc>,
    pub fleet_min_height: Option<u64>,
    pub verdicts: Vec<HeightVerdict>,
    pub absent: Vec<Absence>,
    pub lagging: Vec<Lagging>,
    pub warnings: Vec<Warning>
}

impl Record {
    // At least one height observed and all of them consistent.
    pub fn is_ok(&self) -> bool {
        !self.verdicts.is_empty() && self.verdicts.iter().all(|v| v.verdict.is_consistent())
    }

    pub fn findings(&self) -> impl Iterator<Item = &HeightVerdict> {
        self.verdicts.iter().filter(|v| v.verdict.is_finding())
    }

    pub fn summary(&self) -> String {
        let mut out = format!(
            "Round {} at {}: {}.\nFleet minimum height is {}.\n",
            self.cycle,
            self.at.to_rfc3339(),
            if self.is_ok() { "OK" } else { "NOT OK" },
            self.fleet_min_height.map_or(String::from("unknown"), |h| h.to_string())
        );
        for v in &self.verdicts {
            out.push_str(&format!("  {}: {}\n", v.height, v.verdict));
        }
        for a in &self.absent {
            let reason = match &a.reason {
                Reason::Poll(e) => e.to_string(),
                Reason::Parse(e) => e.to_string()
            };
            out.push_str(&format!("  absent {}#{}: {}\n", a.label, a.node, reason));
        }
        for l in &self.lagging {
            out.push_str(&format!("  lagging {} at {}\n", l.node, l.height));
        }
        for w in &self.warnings {
            out.push_str(&format!("  warning from {}: {}\n", w.node, w.warning));
        }
        out
    }
}
