//! Watcher error types.

use apic_client::ApicError;
use thiserror::Error;

/// Errors that can end the APIC watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    /// APIC client construction or login failed
    #[error("APIC error: {0}")]
    Apic(#[from] ApicError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
