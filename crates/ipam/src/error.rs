//! IPAM errors

use thiserror::Error;

/// Errors returned by address pools
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IpamError {
    /// No free address of the requested family is left
    #[error("No IP addresses are available")]
    PoolExhausted,

    /// A configured range is malformed (mixed families or start after end)
    #[error("Invalid IP range: {0}")]
    InvalidRange(String),
}
