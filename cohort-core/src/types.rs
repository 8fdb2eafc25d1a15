//! Core type definitions for Cohort

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Identity of a registered engine, unique among live engines
pub type EngineId = usize;

/// Record produced by a successful `execute` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    /// Sequence number of this execution on its engine
    pub execution_count: u64,
    pub stdout: String,
    pub stderr: String,
    pub engine_id: EngineId,
    /// Value of the last expression, if the code ended with one
    pub value: Option<JsonValue>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl ExecuteResult {
    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// Which past execution `get_result` should return
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResultIndex {
    #[default]
    Latest,
    At(u64),
}

impl fmt::Display for ResultIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultIndex::Latest => write!(f, "latest"),
            ResultIndex::At(index) => write!(f, "{}", index),
        }
    }
}

impl From<u64> for ResultIndex {
    fn from(index: u64) -> Self {
        ResultIndex::At(index)
    }
}

impl From<Option<u64>> for ResultIndex {
    fn from(index: Option<u64>) -> Self {
        index.map(ResultIndex::At).unwrap_or(ResultIndex::Latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_result_duration() {
        let start = Utc::now();
        let end = start + chrono::Duration::milliseconds(250);
        let result = ExecuteResult {
            execution_count: 0,
            stdout: String::new(),
            stderr: String::new(),
            engine_id: 1,
            value: None,
            started_at: start,
            completed_at: end,
        };
        assert_eq!(result.duration_ms(), 250);
    }

    #[test]
    fn test_result_index_from_option() {
        assert_eq!(ResultIndex::from(None), ResultIndex::Latest);
        assert_eq!(ResultIndex::from(Some(3)), ResultIndex::At(3));
        assert_eq!(ResultIndex::At(7).to_string(), "7");
    }
}
