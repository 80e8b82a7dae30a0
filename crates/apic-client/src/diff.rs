//! Replace-by-key diffing
//!
//! Writing a slice under a label key replaces whatever the key owned before.
//! [`diff_slices`] computes the operations by top-level DN. Objects whose DN
//! is gone are deleted and identical objects are left alone. A changed object
//! is reposted, and since a post merges into the existing subtree, any of its
//! descendants that disappeared are deleted explicitly.

use crate::models::ApicObject;
use std::collections::{BTreeMap, BTreeSet};

/// Operations needed to move a key from one slice to another
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApicDiff {
    /// Objects to post, in the order they appear in the new slice
    pub updates: Vec<ApicObject>,
    /// DNs to delete
    pub deletes: Vec<String>,
}

impl ApicDiff {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.deletes.is_empty()
    }
}

/// Diff two slices by top-level DN
pub fn diff_slices(old: &[ApicObject], new: &[ApicObject]) -> ApicDiff {
    let old_by_dn: BTreeMap<&str, &ApicObject> = old.iter().map(|o| (o.dn(), o)).collect();
    let new_by_dn: BTreeMap<&str, &ApicObject> = new.iter().map(|o| (o.dn(), o)).collect();

    let mut deletes: Vec<String> = old_by_dn
        .keys()
        .filter(|dn| !new_by_dn.contains_key(*dn))
        .map(|dn| (*dn).to_string())
        .collect();

    let mut updates = Vec::new();
    for obj in new {
        match old_by_dn.get(obj.dn()) {
            Some(prev) if *prev == obj => {}
            Some(prev) => {
                let mut kept = BTreeSet::new();
                descendant_dns(obj, &mut kept);
                let mut stale = BTreeSet::new();
                descendant_dns(prev, &mut stale);
                deletes.extend(stale.difference(&kept).map(|dn| (*dn).to_string()));
                updates.push(obj.clone());
            }
            None => updates.push(obj.clone()),
        }
    }

    ApicDiff { updates, deletes }
}

fn descendant_dns<'a>(obj: &'a ApicObject, out: &mut BTreeSet<&'a str>) {
    for child in &obj.children {
        if !child.dn().is_empty() {
            out.insert(child.dn());
        }
        descendant_dns(child, out);
    }
}
