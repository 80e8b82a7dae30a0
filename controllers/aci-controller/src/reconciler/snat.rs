//! SNAT policy reconciliation.
//!
//! All policies share one graph: traffic for any SNAT address is redirected
//! to a forwarding endpoint on every node the fabric can reach. The graph is
//! rebuilt from the full policy cache on every change.

use super::service_graph::{self, FilterEntry, LbGraph};
use super::{Action, Reconciler};
use crate::error::ControllerError;
use crate::state::{ControllerState, SnatPolicyEntry};
use kube_runtime::reflector::ObjectRef;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

const DEFAULT_PROTOCOLS: [&str; 2] = ["tcp", "udp"];

impl Reconciler {
    pub async fn handle_snat(&self, name: &str) -> Result<Action, ControllerError> {
        let Some(policy) = self.stores.snat_policies.get(&ObjectRef::new(name)) else {
            return self.snat_policy_deleted(name).await;
        };

        self.lock_state()
            .snat_policies
            .insert(name.to_string(), SnatPolicyEntry::from(&policy.spec));
        debug!("Cached SNAT policy {}", name);

        if !self.config.apic_sync_enabled {
            return Ok(Action::Done);
        }
        // one more pass folds in updates that raced with the write
        if self.update_snat_graph().await? {
            Ok(Action::Requeue)
        } else {
            Ok(Action::Done)
        }
    }

    async fn snat_policy_deleted(&self, name: &str) -> Result<Action, ControllerError> {
        let now_empty = {
            let mut state = self.lock_state();
            state.snat_policies.remove(name);
            if state.snat_policies.is_empty() {
                let eps = std::mem::take(&mut state.snat_node_eps);
                for ep in eps.values() {
                    state.release_endpoint(ep);
                }
                state.snat_graph = None;
                true
            } else {
                false
            }
        };

        if now_empty {
            info!("Last SNAT policy {} deleted, clearing SNAT graph", name);
            self.clear_objects(&self.name_for("snat", "global")).await?;
        } else if self.config.apic_sync_enabled {
            self.update_snat_graph().await?;
        }
        Ok(Action::Done)
    }

    /// Rebuild the shared SNAT graph and write it when it differs from the
    /// last one written. Returns whether a write happened.
    pub(crate) async fn update_snat_graph(&self) -> Result<bool, ControllerError> {
        let snat_name = self.name_for("snat", "global");
        let graph_name = self.name_for("svc", "global");
        let bd_name = self.name_for("bd", "kubernetes-service");

        let slice = {
            let mut state = self.lock_state();
            let nodes: BTreeSet<String> = state.node_fabric_paths.keys().cloned().collect();
            sync_snat_endpoints(&mut state, &nodes);

            let ingress = snat_ingress(&state.snat_policies);
            let filter_entries = snat_filter_entries(&state.snat_policies);
            let slice = service_graph::load_balancer_objects(
                &self.config,
                &graph_name,
                &bd_name,
                &LbGraph {
                    name: &snat_name,
                    endpoints: &state.snat_node_eps,
                    ingress: &ingress,
                    filter_entries: &filter_entries,
                },
            );
            if state.snat_graph.as_ref() == Some(&slice) {
                debug!("SNAT graph unchanged");
                return Ok(false);
            }
            slice
        };

        self.write_objects(&snat_name, slice.clone()).await?;
        self.lock_state().snat_graph = Some(slice);
        info!("Wrote SNAT graph");
        Ok(true)
    }
}

/// Give every reachable node a SNAT endpoint and release the endpoints of
/// nodes that are gone
fn sync_snat_endpoints(state: &mut ControllerState, nodes: &BTreeSet<String>) {
    let missing: Vec<String> = nodes
        .iter()
        .filter(|n| !state.snat_node_eps.contains_key(*n))
        .cloned()
        .collect();
    let stale: Vec<String> = state
        .snat_node_eps
        .keys()
        .filter(|n| !nodes.contains(*n))
        .cloned()
        .collect();

    for node in missing {
        match state.allocate_endpoint() {
            Some(ep) => {
                state.snat_node_eps.insert(node, ep);
            }
            None => warn!("No node service address left for SNAT endpoint on {}", node),
        }
    }
    for node in stale {
        if let Some(ep) = state.snat_node_eps.remove(&node) {
            state.release_endpoint(&ep);
        }
    }
}

/// Every SNAT address across all policies, sorted and deduplicated
fn snat_ingress(policies: &BTreeMap<String, SnatPolicyEntry>) -> Vec<String> {
    policies
        .values()
        .flat_map(|p| p.snat_ips.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// One entry per protocol and port range. No protocols means tcp and udp;
/// no port ranges means any port.
pub(crate) fn snat_filter_entries(policies: &BTreeMap<String, SnatPolicyEntry>) -> Vec<FilterEntry> {
    let mut entries = BTreeSet::new();
    for policy in policies.values() {
        let protocols: Vec<String> = if policy.protocols.is_empty() {
            DEFAULT_PROTOCOLS.iter().map(|p| (*p).to_string()).collect()
        } else {
            policy.protocols.iter().map(|p| p.to_lowercase()).collect()
        };
        let ports: Vec<Option<(u16, u16)>> = if policy.port_ranges.is_empty() {
            vec![None]
        } else {
            policy.port_ranges.iter().map(|r| Some((r.start, r.end))).collect()
        };
        for protocol in &protocols {
            for range in &ports {
                entries.insert(FilterEntry {
                    protocol: protocol.clone(),
                    ports: *range,
                });
            }
        }
    }
    entries.into_iter().collect()
}
