//! Error types for the Elasticsearch write provider

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Convenience result alias used across the crate
pub type Result<T, E = WriterError> = std::result::Result<T, E>;

/// Bulk write errors
///
/// Variants carry owned strings rather than source errors so a single flush
/// outcome can be cloned to every write handle in the batch.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriterError {
    /// Operation kind this writer cannot express as a bulk action
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Update or delete without an `_id` field
    #[error("Missing identifier for {op} on type {type_name}")]
    MissingIdentifier { op: String, type_name: String },

    /// Whole-batch failure: connection error, non-success status, bad body
    #[error("Transport error: {0}")]
    Transport(String),

    /// One or more items were rejected inside an otherwise successful batch
    #[error("Partial write: {}", describe_failures(.0))]
    PartialWrite(Vec<ItemFailure>),

    /// Write attempted after close
    #[error("Writer is closed")]
    Closed,

    /// The flush owning this write never reported a result
    #[error("Write abandoned: {0}")]
    Abandoned(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl WriterError {
    /// Item failures carried by a partial write, empty for every other variant
    pub fn failures(&self) -> &[ItemFailure] {
        match self {
            WriterError::PartialWrite(failures) => failures,
            _ => &[],
        }
    }
}

/// A single rejected bulk item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Position of the item in its batch
    pub position: usize,
    pub id: Option<String>,
    pub type_name: String,
    pub status: u16,
    pub reason: String,
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} (status {}): {}",
            self.type_name,
            self.id.as_deref().unwrap_or("<auto>"),
            self.status,
            self.reason
        )
    }
}

fn describe_failures(failures: &[ItemFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for WriterError {
    fn from(err: serde_json::Error) -> Self {
        WriterError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for WriterError {
    fn from(err: reqwest::Error) -> Self {
        WriterError::Transport(err.to_string())
    }
}

impl From<std::env::VarError> for WriterError {
    fn from(err: std::env::VarError) -> Self {
        WriterError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_write_names_failing_items() {
        let err = WriterError::PartialWrite(vec![ItemFailure {
            position: 2,
            id: Some("item-3".to_string()),
            type_name: "test".to_string(),
            status: 400,
            reason: "mapper_parsing_exception".to_string(),
        }]);

        let message = err.to_string();
        assert!(message.contains("test/item-3"));
        assert!(message.contains("400"));
        assert_eq!(err.failures().len(), 1);
        assert!(WriterError::Closed.failures().is_empty());
    }
}
