//! In-memory store of the extracted intent.

use crate::models::{Contract, Epg, Filter, FilterRule, NetworkPolicy};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// EPGs and contracts are keyed `<tenant>/<name>`, filters by filter name,
/// network policies by DN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntentDb {
    pub epgs: BTreeMap<String, Epg>,
    pub contracts: BTreeMap<String, Contract>,
    pub filters: BTreeMap<String, Filter>,
    pub network_policies: BTreeMap<String, NetworkPolicy>,
}

impl IntentDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save_epg(&mut self, epg: Epg) {
        debug!("Saving EPG {}", epg.key());
        self.epgs.insert(epg.key(), epg);
    }

    pub fn delete_epg(&mut self, tenant: &str, name: &str) -> bool {
        self.epgs.remove(&format!("{}/{}", tenant, name)).is_some()
    }

    pub fn save_contract(&mut self, contract: Contract) {
        debug!("Saving contract {}", contract.key());
        self.contracts.insert(contract.key(), contract);
    }

    pub fn delete_contract(&mut self, tenant: &str, name: &str) -> bool {
        self.contracts.remove(&format!("{}/{}", tenant, name)).is_some()
    }

    pub fn save_filter(&mut self, name: String, rules: Vec<FilterRule>) {
        debug!("Saving filter {} with {} rule(s)", name, rules.len());
        self.filters.insert(name.clone(), Filter { name, rules });
    }

    pub fn delete_filter(&mut self, name: &str) -> bool {
        self.filters.remove(name).is_some()
    }

    pub fn save_network_policy(&mut self, policy: NetworkPolicy) {
        self.network_policies.insert(policy.dn().to_string(), policy);
    }

    pub fn delete_network_policy(&mut self, dn: &str) -> bool {
        self.network_policies.remove(dn).is_some()
    }

    /// EPGs providing or consuming `contract` (`<tenant>/<name>`)
    pub fn epgs_using_contract<'a>(&'a self, contract: &'a str) -> impl Iterator<Item = &'a Epg> + 'a {
        self.epgs
            .values()
            .filter(move |e| e.provided.iter().chain(&e.consumed).any(|c| c == contract))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epg(tenant: &str, name: &str, provided: &[&str], consumed: &[&str]) -> Epg {
        Epg {
            tenant: tenant.to_string(),
            name: name.to_string(),
            dn: format!("uni/tn-{}/cloudapp-app/cloudepg-{}", tenant, name),
            provided: provided.iter().map(|c| c.to_string()).collect(),
            consumed: consumed.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn test_save_replaces_and_delete_removes() {
        let mut db = IntentDb::new();
        db.save_epg(epg("prod", "web", &["prod/http"], &[]));
        db.save_epg(epg("prod", "web", &["prod/https"], &[]));
        assert_eq!(db.epgs.len(), 1);
        assert_eq!(db.epgs["prod/web"].provided, vec!["prod/https"]);

        assert!(db.delete_epg("prod", "web"));
        assert!(!db.delete_epg("prod", "web"));
        assert!(db.epgs.is_empty());
    }

    #[test]
    fn test_epgs_using_contract() {
        let mut db = IntentDb::new();
        db.save_epg(epg("prod", "web", &["prod/http"], &[]));
        db.save_epg(epg("prod", "client", &[], &["prod/http"]));
        db.save_epg(epg("prod", "db", &["prod/sql"], &[]));

        let names: Vec<&str> = db.epgs_using_contract("prod/http").map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["client", "web"]);
    }

    #[test]
    fn test_filters_keyed_by_name() {
        let mut db = IntentDb::new();
        db.save_filter("prod/flt-http".to_string(), vec![FilterRule::default()]);
        assert_eq!(db.filters["prod/flt-http"].rules.len(), 1);
        assert!(db.delete_filter("prod/flt-http"));
        assert!(db.filters.is_empty());
    }
}
