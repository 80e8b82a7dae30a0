//! Fabric subscriptions and intent extraction.
//!
//! Each subscription event is turned into an IntentDB update. Extraction
//! holds the database lock for the whole event so readers never see half
//! an update.

use crate::dn;
use crate::intent_db::IntentDb;
use crate::models::{Contract, Epg, FilterRule, NetworkPolicy, PortSpec};
use apic_client::{ApicClientTrait, ApicObject, ApicSubscriber, Subscription, SubscriptionChange, SubscriptionEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const EPG_CLASS: &str = "cloudEPg";
pub const CONTRACT_CLASS: &str = "vzBrCP";
pub const FILTER_CLASS: &str = "vzFilter";
pub const HOST_PROT_POL_CLASS: &str = "hostprotPol";

const EVENT_BUFFER: usize = 64;

pub struct ApicWatcher {
    policy_tenant: String,
    db: Mutex<IntentDb>,
}

impl ApicWatcher {
    pub fn new(policy_tenant: impl Into<String>) -> Self {
        Self {
            policy_tenant: policy_tenant.into(),
            db: Mutex::new(IntentDb::new()),
        }
    }

    fn policy_dn(&self) -> String {
        format!("uni/tn-{}", self.policy_tenant)
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        vec![
            Subscription::class(EPG_CLASS),
            Subscription::class(CONTRACT_CLASS),
            Subscription::class(FILTER_CLASS),
            Subscription::dn_subtree(&self.policy_dn(), &[HOST_PROT_POL_CLASS]),
        ]
    }

    fn lock_db(&self) -> MutexGuard<'_, IntentDb> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the current intent
    pub fn snapshot(&self) -> IntentDb {
        self.lock_db().clone()
    }

    /// Poll the fabric until `token` is cancelled
    pub async fn run(self: Arc<Self>, apic: Arc<dyn ApicClientTrait>, refresh: Duration, token: CancellationToken) {
        let subscriber = self
            .subscriptions()
            .into_iter()
            .fold(ApicSubscriber::new(apic, refresh), ApicSubscriber::subscribe);
        let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
        let handle = tokio::spawn(subscriber.run(tx, token));

        while let Some(event) = rx.recv().await {
            self.handle_event(&event);
        }
        if let Err(e) = handle.await {
            error!("APIC subscriber task failed: {}", e);
        }
        info!("APIC watcher stopped");
    }

    pub fn handle_event(&self, event: &SubscriptionEvent) {
        match (&event.subscription, &event.change) {
            (Subscription::Class(class), SubscriptionChange::Updated(obj)) => match class.as_str() {
                EPG_CLASS => self.epg_changed(obj),
                CONTRACT_CLASS => self.contract_changed(obj),
                FILTER_CLASS => self.filter_changed(obj),
                other => debug!("Ignoring update for class {}", other),
            },
            (Subscription::Class(class), SubscriptionChange::Deleted(dn)) => match class.as_str() {
                EPG_CLASS => self.epg_deleted(dn),
                CONTRACT_CLASS => self.contract_deleted(dn),
                FILTER_CLASS => self.filter_deleted(dn),
                other => debug!("Ignoring delete for class {}", other),
            },
            (Subscription::DnSubtree { .. }, SubscriptionChange::Updated(obj)) => self.network_policy_changed(obj),
            (Subscription::DnSubtree { .. }, SubscriptionChange::Deleted(dn)) => self.network_policy_deleted(dn),
        }
    }

    pub fn epg_changed(&self, obj: &ApicObject) {
        let epg_dn = obj.dn();
        info!("EPG changed: {}", epg_dn);
        let mut epg = Epg {
            tenant: dn::tenant(epg_dn).to_string(),
            name: obj.attr_str("name").to_string(),
            dn: epg_dn.to_string(),
            ..Default::default()
        };
        for child in &obj.children {
            let list = match child.class.as_str() {
                "fvRsProv" => &mut epg.provided,
                "fvRsCons" => &mut epg.consumed,
                _ => continue,
            };
            match contract_ref(child) {
                Ok(name) => list.push(name),
                Err(reason) => error!("EPG {}: {}", epg.name, reason),
            }
        }
        self.lock_db().save_epg(epg);
    }

    pub fn epg_deleted(&self, epg_dn: &str) {
        let (tenant, name) = (dn::tenant(epg_dn), dn::epg_name(epg_dn));
        if self.lock_db().delete_epg(tenant, name) {
            info!("EPG deleted: {}/{}", tenant, name);
        }
    }

    pub fn contract_changed(&self, obj: &ApicObject) {
        let contract_dn = obj.dn();
        let Some((tenant, name)) = dn::contract_name(contract_dn) else {
            warn!("Bad contract dn: {}", contract_dn);
            return;
        };
        info!("Contract changed: {}", contract_dn);

        let mut filters = Vec::new();
        for subject in obj.children_of("vzSubj") {
            let before = filters.len();
            filters.extend(
                subject
                    .children_of("vzRsSubjFiltAtt")
                    .map(|att| dn::filter_name(att.attr_str("tDn"))),
            );
            if filters.len() == before {
                filters.push(dn::UNKNOWN_FILTER.to_string());
            }
        }

        self.lock_db().save_contract(Contract {
            tenant: tenant.to_string(),
            name: name.to_string(),
            filters,
        });
    }

    pub fn contract_deleted(&self, contract_dn: &str) {
        let Some((tenant, name)) = dn::contract_name(contract_dn) else {
            error!("Bad contract dn: {}", contract_dn);
            return;
        };
        if self.lock_db().delete_contract(tenant, name) {
            info!("Contract deleted: {}/{}", tenant, name);
        }
    }

    pub fn filter_changed(&self, obj: &ApicObject) {
        let name = dn::filter_name(obj.dn());
        info!("Filter changed: {}", obj.dn());
        let rules = obj.children_of("vzEntry").map(filter_rule).collect();
        self.lock_db().save_filter(name, rules);
    }

    pub fn filter_deleted(&self, filter_dn: &str) {
        let name = dn::filter_name(filter_dn);
        if self.lock_db().delete_filter(&name) {
            info!("Filter deleted: {}", name);
        }
    }

    pub fn network_policy_changed(&self, obj: &ApicObject) {
        let policy = match serde_json::to_value(obj).and_then(serde_json::from_value::<NetworkPolicy>) {
            Ok(policy) => policy,
            Err(e) => {
                error!("Could not decode host protection policy {}: {}", obj.dn(), e);
                return;
            }
        };
        info!("Network policy added: {}", policy.dn());
        self.lock_db().save_network_policy(policy);
    }

    pub fn network_policy_deleted(&self, policy_dn: &str) {
        if self.lock_db().delete_network_policy(policy_dn) {
            info!("Network policy deleted: {}", policy_dn);
        }
    }
}

/// `<tenant of tDn>/<tnVzBrCPName>` for a provider or consumer relation
fn contract_ref(rel: &ApicObject) -> Result<String, String> {
    let target = rel.attr_str("tDn");
    if target.is_empty() {
        return Err("relation missing tDn".to_string());
    }
    let name = rel.attr_str("tnVzBrCPName");
    if name.is_empty() {
        return Err(format!("contract {} missing tnVzBrCPName", target));
    }
    Ok(format!("{}/{}", dn::tenant(target), name))
}

fn filter_rule(entry: &ApicObject) -> FilterRule {
    let protocol = entry.attr_str("prot");
    FilterRule {
        protocol: (!protocol.is_empty() && protocol != "unspecified").then(|| protocol.to_string()),
        ports: PortSpec {
            start: entry.attr_str("dFromPort").parse().ok(),
            end: entry.attr_str("dToPort").parse().ok(),
        },
    }
}
