//! Store configuration

use crate::error::Result;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Configuration for a fact store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Deepest term nesting the parser accepts
    pub max_depth: usize,
    /// Emit a trace event for every term evaluated
    pub trace_evaluation: bool,
    /// Query passes slower than this are logged as warnings (in milliseconds)
    pub slow_query_ms: u64,
    /// Property names rejected on write, on top of the built-in ones
    pub reserved_names: Vec<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_depth: DEFAULT_MAX_DEPTH,
            trace_evaluation: false,
            slow_query_ms: 1000,
            reserved_names: Vec::new(),
        }
    }
}

impl StoreConfig {
    /// Load from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = StoreConfig::from_json(r#"{"slow_query_ms": 50, "reserved_names": ["id"]}"#)
            .unwrap();
        assert_eq!(config.slow_query_ms, 50);
        assert_eq!(config.reserved_names, vec!["id"]);
        assert_eq!(config.max_depth, DEFAULT_MAX_DEPTH);
        assert!(!config.trace_evaluation);
    }

    #[test]
    fn test_bad_json() {
        assert!(StoreConfig::from_json("{\"max_depth\": \"deep\"}").is_err());
    }
}
