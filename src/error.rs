// src/error.rs

//! Unified error handling for the synchronizer.

use std::fmt;

use thiserror::Error;

use crate::utils::http::FetchError;

/// Result type alias for synchronizer operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Every failure the synchronizer surfaces.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client construction or transport failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A source fetch failed after classification
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// JSON artifact or payload could not be (de)serialized
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Remote store driver error
    #[cfg(feature = "postgres")]
    #[error("Postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Crawling error
    #[error("Crawl failed at {context}: {message}")]
    Crawl { context: String, message: String },

    /// Timestamp model could not be fitted
    #[error("Estimator error: {0}")]
    Estimator(String),

    /// A blocking worker task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Remote store rejected a statement or transaction command
    #[error("Remote store error: {0}")]
    Remote(String),
}

impl AppError {
    /// Invalid or missing configuration.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Rejected input value.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Failure tied to one item or page.
    pub fn crawl(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Crawl {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create an estimator error.
    pub fn estimator(message: impl Into<String>) -> Self {
        Self::Estimator(message.into())
    }

    /// Create a remote store error.
    pub fn remote(message: impl fmt::Display) -> Self {
        Self::Remote(message.to_string())
    }
}
