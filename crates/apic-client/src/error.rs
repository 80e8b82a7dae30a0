//! APIC client errors

use thiserror::Error;

/// Errors that can occur when interacting with the APIC REST API
#[derive(Debug, Error)]
pub enum ApicError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// APIC returned an error status or error body
    #[error("APIC API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Login failed on every configured host
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Managed object or class not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object tree without a usable DN or class
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}
