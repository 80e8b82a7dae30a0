//! APIC REST API Client
//!
//! Managed-object model, object constructors and the replace-by-key writer
//! used by the ACI controllers to talk to the fabric.
//!
//! # Example
//!
//! ```no_run
//! use apic_client::{objects, ApicClient, ApicClientTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApicClient::new(
//!     vec!["apic1.example.com".to_string()],
//!     "admin".to_string(),
//!     "password".to_string(),
//!     false,
//! )?;
//!
//! // Everything previously written under the key is replaced
//! let filter = objects::vz_filter("common", "kube_svc_default_web");
//! client.write_apic_objects("kube_svc_default_web", vec![filter]).await?;
//!
//! // And removed again
//! client.clear_apic_objects("kube_svc_default_web").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod diff;
pub mod error;
pub mod models;
pub mod objects;
pub mod subscription;
#[path = "trait.rs"]
pub mod apic_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use apic_trait::ApicClientTrait;
pub use client::ApicClient;
pub use diff::{ApicDiff, diff_slices};
pub use error::ApicError;
pub use models::{ApicObject, ApicResponse, ApicSlice};
pub use subscription::{ApicSubscriber, Subscription, SubscriptionChange, SubscriptionEvent};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{MockApicClient, MockCall};
