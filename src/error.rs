// src/error.rs

//! Unified error handling for the crawler application.

use std::fmt;

use thiserror::Error;

/// Result type alias for crawler operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Regular expression failed to compile
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Store contents are inconsistent; the run must not write anything
    #[error("Integrity violation in '{table}': {message}")]
    Integrity { table: String, message: String },

    /// Table storage failed
    #[error("Storage error for {context}: {message}")]
    Storage { context: String, message: String },

    /// The scan hit a failure it could not retry past
    #[error(
        "Scan aborted at key {key} via {endpoint}: {reason} (last found key: {})",
        last_found_key.map_or_else(|| "none".to_string(), |k| k.to_string())
    )]
    ScanAborted {
        key: u64,
        last_found_key: Option<u64>,
        endpoint: String,
        reason: String,
    },

    /// Another run holds the store lock
    #[error("Another run is in progress (lock held at {0})")]
    RunLocked(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create an integrity error for a table.
    pub fn integrity(table: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Integrity {
            table: table.into(),
            message: message.to_string(),
        }
    }

    /// Create a storage error with context.
    pub fn storage(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Storage {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error aborts a run before anything was committed.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            Self::Integrity { .. } | Self::ScanAborted { .. } | Self::RunLocked(_)
        )
    }
}
