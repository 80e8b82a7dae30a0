//! A v4 pool and a v6 pool kept side by side

use crate::alloc::{IpAlloc, IpRange};
use crate::error::IpamError;
use std::net::IpAddr;
use tracing::debug;

/// Dual-stack pool pair. Every operation is routed to the pool of the
/// address family it concerns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetIps {
    pub v4: IpAlloc,
    pub v6: IpAlloc,
}

impl NetIps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ranges(ranges: &[IpRange]) -> Result<Self, IpamError> {
        let mut ips = Self::new();
        ips.add_ranges(ranges)?;
        Ok(ips)
    }

    pub fn add_ranges(&mut self, ranges: &[IpRange]) -> Result<(), IpamError> {
        for range in ranges {
            if range.is_ipv4() {
                self.v4.add_range(range)?;
            } else {
                self.v6.add_range(range)?;
            }
        }
        Ok(())
    }

    fn pool_mut(&mut self, ip: IpAddr) -> &mut IpAlloc {
        if ip.is_ipv4() { &mut self.v4 } else { &mut self.v6 }
    }

    /// Release an address to the pool of its family
    pub fn add_ip(&mut self, ip: IpAddr) {
        self.pool_mut(ip).add_ip(ip);
    }

    /// Allocate a specific address from the pool of its family
    pub fn remove_ip(&mut self, ip: IpAddr) -> bool {
        self.pool_mut(ip).remove_ip(ip)
    }

    /// Release a batch of addresses
    pub fn return_ips<'a>(&mut self, ips: impl IntoIterator<Item = &'a IpAddr>) {
        for ip in ips {
            debug!("Returning {} to pool", ip);
            self.add_ip(*ip);
        }
    }

    /// Remove every member of `other` from both families
    pub fn subtract(&mut self, other: &NetIps) {
        self.v4.subtract(&other.v4);
        self.v6.subtract(&other.v6);
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        if ip.is_ipv4() {
            self.v4.contains(ip)
        } else {
            self.v6.contains(ip)
        }
    }
}
