//! Error type and options shared by the library and the CLI.
//! No document or graph state lives here.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::schema::{ItemId, SheetPath};

#[derive(Debug, thiserror::Error)]
pub enum SheetNetError {
    /// Two candidates tied on every tiebreak yet carry different names.
    /// Aborts the pass; the previous resolved graph is kept.
    #[error("ambiguous driver on {path}: {first} ({first_item}) ties with {second} ({second_item})")]
    AmbiguousDriver {
        path: SheetPath,
        first: String,
        first_item: ItemId,
        second: String,
        second_item: ItemId,
    },
    #[error("corrupted connectivity state: {0}")]
    CorruptState(String),
    #[error("recompute for generation {generation} was superseded by generation {latest}")]
    Cancelled { generation: u64, latest: u64 },
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tuning knobs for a connectivity graph.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ConnectivityOptions {
    /// Run the per-sheet phase on a worker pool
    #[serde(default = "default_parallel")]
    pub parallel: bool,
    /// Worker pool size; `None` uses the global rayon pool
    #[serde(default)]
    pub threads: Option<usize>,
    /// Incremental passes touching at least this many sheet instances use the pool
    #[serde(default = "default_parallel_threshold")]
    pub parallel_threshold: usize,
    /// Regexes recognising auto-generated net names
    #[serde(default = "default_auto_name_patterns")]
    pub auto_name_patterns: Vec<String>,
}

fn default_parallel() -> bool {
    true
}

fn default_parallel_threshold() -> usize {
    4
}

fn default_auto_name_patterns() -> Vec<String> {
    vec![
        r"^Net-".to_string(),
        r"^unconnected-".to_string(),
    ]
}

impl Default for ConnectivityOptions {
    fn default() -> Self {
        Self {
            parallel: default_parallel(),
            threads: None,
            parallel_threshold: default_parallel_threshold(),
            auto_name_patterns: default_auto_name_patterns(),
        }
    }
}

impl ConnectivityOptions {
    /// Single-threaded options, handy for deterministic tests and tiny documents.
    pub fn sequential() -> Self {
        Self {
            parallel: false,
            ..Self::default()
        }
    }

    pub fn from_json_str(content: &str) -> Result<Self, SheetNetError> {
        let options: ConnectivityOptions = serde_json::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, SheetNetError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), SheetNetError> {
        if self.threads == Some(0) {
            return Err(SheetNetError::InvalidOptions(
                "threads must be at least 1".to_string(),
            ));
        }
        for pattern in &self.auto_name_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                SheetNetError::InvalidOptions(format!("bad auto-name pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }
}
