// src/error.rs

//! Unified error handling for the pipeline.
//!
//! Per-document stage failures are not errors: they are recorded as
//! [`FailureReason`](crate::models::FailureReason) values in the run report.
//! `AppError` is reserved for failures that stop a whole operation.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for pipeline operations.
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

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A material name or document key that cannot be used as a path segment
    #[error("Invalid {kind} '{value}'")]
    InvalidKey { kind: &'static str, value: String },

    /// Fetch stage failed; nothing downstream runs
    #[error("Fetch failed for {material}: {message}")]
    Fetch { material: String, message: String },

    /// Expected artifact root directory is absent
    #[error("Directory not found: {}", .0.display())]
    RootMissing(PathBuf),

    /// Extractor backend returned an unusable response
    #[error("Extractor error: {0}")]
    Extractor(String),

    /// A collaborator call exceeded its time budget
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },
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

    /// Create an invalid key error.
    pub fn invalid_key(kind: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidKey {
            kind,
            value: value.into(),
        }
    }

    /// Create a fetch error with the material as context.
    pub fn fetch(material: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            material: material.into(),
            message: message.to_string(),
        }
    }

    /// Create an extractor error.
    pub fn extractor(message: impl fmt::Display) -> Self {
        Self::Extractor(message.to_string())
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            secs,
        }
    }
}
