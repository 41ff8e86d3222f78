//! Error types for the exporter.
//!
//! Only [`DefinitionError`] is fatal, and only at startup. Everything raised
//! while scraping is logged and degrades one target or one collector.

use pgsight_common::RowError;
use thiserror::Error;

/// A target could not be reached or refused the login.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connection to {address} timed out after {timeout_ms}ms")]
    Timeout { address: String, timeout_ms: u64 },

    #[error("failed to connect to {address}: {message}")]
    Failed { address: String, message: String },
}

/// A single query failed on an open connection.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("query timed out after {0}ms")]
    Timeout(u64),

    #[error("query failed: {0}")]
    Failed(String),

    #[error("column '{column}' has unsupported type {type_name}")]
    UnsupportedType { column: String, type_name: String },

    #[error("connection is closed")]
    Closed,
}

/// A label set did not match an instrument's declared schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("metric '{metric}' expects labels {expected:?}, got {got:?}")]
pub struct LabelError {
    pub metric: String,
    pub expected: Vec<String>,
    pub got: Vec<String>,
}

/// Rows could not be turned into observations.
#[derive(Debug, Error)]
pub enum MappingError {
    #[error(transparent)]
    Row(#[from] RowError),

    #[error(transparent)]
    Labels(#[from] LabelError),

    #[error("unknown instrument '{0}'")]
    UnknownInstrument(String),

    #[error("unexpected result: {0}")]
    Unexpected(String),

    #[error("mapping panicked: {0}")]
    Panicked(String),
}

impl MappingError {
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::Unexpected(msg.into())
    }
}

/// The catalogue or metric space was misconfigured.
#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("metric '{name}' already registered with labels {existing:?}, requested {requested:?}")]
    Conflict {
        name: String,
        existing: Vec<String>,
        requested: Vec<String>,
    },

    #[error("invalid metric name '{0}'")]
    InvalidName(String),

    #[error("invalid label name '{label}' on metric '{metric}'")]
    InvalidLabel { metric: String, label: String },

    #[error("duplicate collector name '{0}'")]
    DuplicateCollector(String),
}
