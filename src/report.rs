use std::cmp::Ordering;
use std::fmt;
use serde::{Serialize, Deserialize};
use thiserror::Error;

// A reported state value. Values are ledger state, not measurements, so two
// values are equal only if they parse to the exact same number.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
#[serde(transparent)]
pub struct Value(f64);

impl Value {
    pub fn new(x: f64) -> Option<Self> {
        if !x.is_finite() {
            return None;
        }
        // -0 and 0 are the same state.
        Some(Self(if x == 0.0 { 0.0 } else { x }))
    }

    pub fn parse(token: &str) -> Option<Self> {
        token.trim().parse::<f64>().ok().and_then(Self::new)
    }

    pub fn get(&self) -> f64 {
        self.0
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // f64's Display is the shortest text that parses back to the same bits.
        write!(f, "{}", self.0)
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone)]
pub struct StateReport {
    pub height: u64,
    pub hash: String,
    pub entries: Vec<(String, Value)>
}

impl StateReport {
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }

    // Inverse of parse for well-formed reports.
    pub fn render(&self) -> String {
        let mut out = format!("{}\n{}\n", self.height, self.hash);
        for (key, value) in &self.entries {
            out.push_str(&format!("{}\n{}\n", key, value));
        }
        out
    }
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Debug, Clone, Error)]
pub enum Error {
    // Fatal: no report can be built.
    #[error("payload has {lines} line(s), need at least height and hash")]
    Incomplete { lines: usize },
    #[error("height {0:?} is not an integer")]
    BadHeight(String),
    // Warnings: the report is built without the offending pair.
    #[error("key {key:?} has no value line")]
    Truncated { key: String },
    #[error("value {value:?} for key {key:?} is not a number")]
    BadValue { key: String, value: String },
    #[error("key {key:?} reported more than once, keeping the last value")]
    DuplicateKey { key: String }
}

impl Error {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Incomplete { .. } | Error::BadHeight(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    pub report: StateReport,
    pub warnings: Vec<Error>
}

pub fn parse(payload: &str) -> Result<Parsed, Error> {
    let mut lines: Vec<&str> = payload
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .collect();
    // Terminating newline.
    if lines.last() == Some(&"") {
        lines.pop();
    }
    if lines.len() < 2 {
        return Err(Error::Incomplete { lines: lines.len() });
    }
    let height = lines[0]
        .trim()
        .parse::<u64>()
        .map_err(|_| Error::BadHeight(String::from(lines[0])))?;
    let hash = String::from(lines[1]);

    let mut entries: Vec<(String, Value)> = Vec::default();
    let mut warnings = Vec::default();
    for pair in lines[2..].chunks(2) {
        let key = String::from(pair[0]);
        let Some(token) = pair.get(1) else {
            warnings.push(Error::Truncated { key });
            break;
        };
        let Some(value) = Value::parse(token) else {
            warnings.push(Error::BadValue { key, value: String::from(*token) });
            continue;
        };
        if let Some(idx) = entries.iter().position(|(k, _)| *k == key) {
            entries.remove(idx);
            warnings.push(Error::DuplicateKey { key: key.clone() });
        }
        entries.push((key, value));
    }
    Ok(Parsed {
        report: StateReport { height, hash, entries },
        warnings
    })
}
