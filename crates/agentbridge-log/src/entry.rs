//! On-disk log entry shape: one compact JSON object per line.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Client,
    Agent,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Client => "client",
            Direction::Agent => "agent",
        }
    }
}

/// `{"t": <nanos>, "d": "client"|"agent", "m": <payload>}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub t: i64,
    pub d: Direction,
    pub m: Value,
}

impl LogEntry {
    pub fn new(t: i64, d: Direction, m: Value) -> Self {
        Self { t, d, m }
    }

    /// Serializes to the single-line-JSON form written to a segment, with
    /// the trailing newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_line_encoding() {
        let entry = LogEntry::new(42, Direction::Agent, serde_json::json!({"hello": "world"}));
        let line = entry.to_line().unwrap();
        assert!(line.ends_with('\n'));
        let decoded = LogEntry::from_line(line.trim_end()).unwrap();
        assert_eq!(decoded.t, 42);
        assert_eq!(decoded.d, Direction::Agent);
        assert_eq!(decoded.m, serde_json::json!({"hello": "world"}));
    }
}
