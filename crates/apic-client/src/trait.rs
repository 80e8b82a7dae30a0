//! ApicClient trait for mocking
//!
//! The controllers only see the fabric through this trait, so tests can swap
//! the REST client for [`crate::MockApicClient`].

use crate::error::ApicError;
use crate::models::{ApicObject, ApicSlice};

/// Fabric object-graph writer and query surface
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ApicClientTrait: Send + Sync {
    /// Replace everything owned by `key` with `objects`
    async fn write_apic_objects(&self, key: &str, objects: ApicSlice) -> Result<(), ApicError>;

    /// Delete everything owned by `key`
    async fn clear_apic_objects(&self, key: &str) -> Result<(), ApicError>;

    /// All objects of a class, with full subtrees
    async fn query_class(&self, class: &str) -> Result<Vec<ApicObject>, ApicError>;

    /// Objects of the given classes in the subtree rooted at `dn`
    async fn query_dn_subtree(&self, dn: &str, classes: &[String]) -> Result<Vec<ApicObject>, ApicError>;
}
