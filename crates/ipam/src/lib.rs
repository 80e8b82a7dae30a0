//! Dual-stack address pools
//!
//! Free-address bookkeeping for the ACI controller. Pools hold the set of
//! *free* addresses: allocating removes an address from the set, releasing
//! re-inserts it. Nothing is persisted; a pool is rebuilt at startup by
//! seeding it from configured ranges and subtracting every address that live
//! objects record as in use.
//!
//! # Example
//!
//! ```
//! use ipam::{IpAlloc, IpRange};
//! use std::net::IpAddr;
//!
//! let mut pool = IpAlloc::new();
//! pool.add_range(&IpRange::new("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()).unwrap()).unwrap();
//!
//! let ip = pool.get_ip().unwrap();
//! assert_eq!(ip, "10.0.0.1".parse::<IpAddr>().unwrap());
//! pool.add_ip(ip);
//! assert!(pool.contains(ip));
//! ```

pub mod alloc;
pub mod error;
pub mod net_ips;

pub use alloc::{IpAlloc, IpRange};
pub use error::IpamError;
pub use net_ips::NetIps;
