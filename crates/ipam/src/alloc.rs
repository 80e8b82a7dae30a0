//! Free-address set backed by sorted, merged ranges

use crate::error::IpamError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// An inclusive address range as it appears in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpRange {
    pub start: IpAddr,
    pub end: IpAddr,
}

impl IpRange {
    /// Create a range, rejecting mixed families and reversed bounds
    pub fn new(start: IpAddr, end: IpAddr) -> Result<Self, IpamError> {
        let range = Self { start, end };
        range.span()?;
        Ok(range)
    }

    /// A range holding exactly one address
    pub fn single(ip: IpAddr) -> Self {
        Self { start: ip, end: ip }
    }

    pub fn is_ipv4(&self) -> bool {
        self.start.is_ipv4()
    }

    fn span(&self) -> Result<Span, IpamError> {
        let (start_v6, start) = to_key(self.start);
        let (end_v6, end) = to_key(self.end);
        if start_v6 != end_v6 {
            return Err(IpamError::InvalidRange(format!(
                "{} and {} belong to different address families",
                self.start, self.end
            )));
        }
        if start > end {
            return Err(IpamError::InvalidRange(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        Ok(Span { v6: start_v6, start, end })
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

// Ordering is (family, start): v4 ranges sort before v6 ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct Span {
    v6: bool,
    start: u128,
    end: u128,
}

impl Span {
    fn contains(&self, v6: bool, value: u128) -> bool {
        self.v6 == v6 && self.start <= value && value <= self.end
    }

    fn to_range(self) -> IpRange {
        IpRange {
            start: from_key(self.v6, self.start),
            end: from_key(self.v6, self.end),
        }
    }
}

fn to_key(ip: IpAddr) -> (bool, u128) {
    match ip {
        IpAddr::V4(addr) => (false, u128::from(u32::from(addr))),
        IpAddr::V6(addr) => (true, u128::from(addr)),
    }
}

fn from_key(v6: bool, value: u128) -> IpAddr {
    if v6 {
        IpAddr::V6(Ipv6Addr::from(value))
    } else {
        // v4 spans never hold values above u32::MAX
        IpAddr::V4(Ipv4Addr::from(value as u32))
    }
}

/// A set of free addresses.
///
/// Addresses of both families may live in one pool; the controller keeps one
/// pool per family through [`crate::NetIps`]. Allocation always hands out the
/// lowest free address, v4 before v6.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpAlloc {
    spans: Vec<Span>,
}

impl IpAlloc {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a pool holding every address of `ranges`
    pub fn from_ranges(ranges: &[IpRange]) -> Result<Self, IpamError> {
        let mut pool = Self::new();
        pool.add_ranges(ranges)?;
        Ok(pool)
    }

    pub fn add_range(&mut self, range: &IpRange) -> Result<(), IpamError> {
        let span = range.span()?;
        self.insert(span);
        Ok(())
    }

    pub fn add_ranges(&mut self, ranges: &[IpRange]) -> Result<(), IpamError> {
        for range in ranges {
            self.add_range(range)?;
        }
        Ok(())
    }

    /// Merge every free address of `other` into this pool
    pub fn add_all(&mut self, other: &IpAlloc) {
        for span in &other.spans {
            self.insert(*span);
        }
    }

    /// Remove every address of `other` from this pool
    pub fn subtract(&mut self, other: &IpAlloc) {
        for span in &other.spans {
            self.cut(*span);
        }
    }

    /// Release an address back to the pool. Re-adding a free address is a no-op.
    pub fn add_ip(&mut self, ip: IpAddr) {
        let (v6, value) = to_key(ip);
        self.insert(Span { v6, start: value, end: value });
    }

    /// Allocate a specific address. Returns false when it is not free.
    pub fn remove_ip(&mut self, ip: IpAddr) -> bool {
        let (v6, value) = to_key(ip);
        let Some(idx) = self.spans.iter().position(|s| s.contains(v6, value)) else {
            return false;
        };
        let span = self.spans[idx];
        match (span.start == value, span.end == value) {
            (true, true) => {
                self.spans.remove(idx);
            }
            (true, false) => self.spans[idx].start = value + 1,
            (false, true) => self.spans[idx].end = value - 1,
            (false, false) => {
                self.spans[idx].end = value - 1;
                self.spans.insert(
                    idx + 1,
                    Span {
                        v6,
                        start: value + 1,
                        end: span.end,
                    },
                );
            }
        }
        true
    }

    /// Allocate the lowest free address
    pub fn get_ip(&mut self) -> Result<IpAddr, IpamError> {
        let first = self.spans.first_mut().ok_or(IpamError::PoolExhausted)?;
        let ip = from_key(first.v6, first.start);
        if first.start == first.end {
            self.spans.remove(0);
        } else {
            first.start += 1;
        }
        Ok(ip)
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        let (v6, value) = to_key(ip);
        self.spans.iter().any(|s| s.contains(v6, value))
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    /// Number of free addresses, saturating at `u128::MAX`
    pub fn len(&self) -> u128 {
        self.spans
            .iter()
            .fold(0u128, |acc, s| acc.saturating_add((s.end - s.start).saturating_add(1)))
    }

    /// The free set as merged ranges, lowest first
    pub fn free_list(&self) -> Vec<IpRange> {
        self.spans.iter().map(|s| s.to_range()).collect()
    }

    fn insert(&mut self, span: Span) {
        let idx = self.spans.partition_point(|s| *s < span);
        self.spans.insert(idx, span);
        self.merge();
    }

    fn merge(&mut self) {
        let mut merged: Vec<Span> = Vec::with_capacity(self.spans.len());
        for span in self.spans.drain(..) {
            if let Some(last) = merged.last_mut() {
                let touches = last
                    .end
                    .checked_add(1)
                    .is_none_or(|next| next >= span.start);
                if last.v6 == span.v6 && touches {
                    last.end = last.end.max(span.end);
                    continue;
                }
            }
            merged.push(span);
        }
        self.spans = merged;
    }

    fn cut(&mut self, cut: Span) {
        let mut out = Vec::with_capacity(self.spans.len() + 1);
        for span in self.spans.drain(..) {
            if span.v6 != cut.v6 || span.end < cut.start || span.start > cut.end {
                out.push(span);
                continue;
            }
            if span.start < cut.start {
                out.push(Span {
                    v6: span.v6,
                    start: span.start,
                    end: cut.start - 1,
                });
            }
            if span.end > cut.end {
                out.push(Span {
                    v6: span.v6,
                    start: cut.end + 1,
                    end: span.end,
                });
            }
        }
        self.spans = out;
    }
}
