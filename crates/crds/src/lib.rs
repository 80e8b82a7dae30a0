//! ACI bridge CRD Definitions
//!
//! Custom resources watched by the ACI controller, plus the service
//! annotation format used to persist per-node service endpoints.

pub mod netflow_policy;
pub mod service_endpoint;
pub mod snat_policy;

pub use netflow_policy::*;
pub use service_endpoint::*;
pub use snat_policy::*;
