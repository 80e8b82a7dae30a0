//! Node fabric-path tracking.
//!
//! APIC reports where each node's uplink attaches to the fabric as
//! `opflexODev` objects. The controller keeps them per node; the oldest
//! attachment of a node is the path used for its concrete device. Every
//! change rewrites the shared device cluster and re-queues the services
//! with backends on the affected nodes.

use super::Reconciler;
use super::service_graph;
use crate::error::ControllerError;
use crate::state::FabricAttachment;
use apic_client::{ApicObject, SubscriptionChange, SubscriptionEvent};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

pub const OPFLEX_DEVICE_CLASS: &str = "opflexODev";

/// Fold a changed attachment into the map. Returns the nodes whose list
/// changed.
///
/// Each node's list sees at most one change per call: a record whose host
/// moved is removed from its old node, a record whose path changed is
/// replaced and moved to the end, and a new record is appended to (or
/// creates) the list of its host.
pub fn apply_device_changed(map: &mut BTreeMap<String, Vec<FabricAttachment>>, att: &FabricAttachment) -> Vec<String> {
    let mut updated = Vec::new();
    let mut host_found = false;

    for (node, atts) in map.iter_mut() {
        let is_host = *node == att.host_name;
        host_found |= is_host;

        match atts.iter().position(|a| a.dn == att.dn) {
            Some(idx) if !is_host => {
                debug!("Moving fabric path {} away from node {}", atts[idx].fabric_path, node);
                atts.remove(idx);
                updated.push(node.clone());
            }
            Some(idx) if atts[idx].fabric_path != att.fabric_path => {
                debug!("Updating fabric path of node {} to {}", node, att.fabric_path);
                atts.remove(idx);
                atts.push(att.clone());
                updated.push(node.clone());
            }
            Some(_) => {}
            None if is_host => {
                debug!("Appending fabric path {} to node {}", att.fabric_path, node);
                atts.push(att.clone());
                updated.push(node.clone());
            }
            None => {}
        }
    }

    if !host_found {
        debug!("Adding fabric path {} for node {}", att.fabric_path, att.host_name);
        map.insert(att.host_name.clone(), vec![att.clone()]);
        updated.push(att.host_name.clone());
    }
    map.retain(|_, atts| !atts.is_empty());
    updated
}

/// Remove the attachment with `dn`. Returns the nodes whose list changed.
pub fn apply_device_deleted(map: &mut BTreeMap<String, Vec<FabricAttachment>>, dn: &str) -> Vec<String> {
    let mut updated = Vec::new();
    for (node, atts) in map.iter_mut() {
        if let Some(idx) = atts.iter().position(|a| a.dn == dn) {
            debug!("Deleting fabric path {} of node {}", atts[idx].fabric_path, node);
            atts.remove(idx);
            updated.push(node.clone());
        }
    }
    map.retain(|_, atts| !atts.is_empty());
    updated
}

impl Reconciler {
    /// Route one subscription event to the tracker. Failures are logged;
    /// the next change or resync rewrites the shared objects.
    pub async fn handle_subscription_event(&self, event: SubscriptionEvent) {
        let result = match &event.change {
            SubscriptionChange::Updated(obj) if obj.class == OPFLEX_DEVICE_CLASS => self.opflex_device_changed(obj).await,
            SubscriptionChange::Updated(obj) => {
                debug!("Ignoring {} object {}", obj.class, obj.dn());
                Ok(())
            }
            SubscriptionChange::Deleted(dn) => self.opflex_device_deleted(dn).await,
        };
        if let Err(e) = result {
            error!("Failed to apply fabric path change: {}", e);
        }
    }

    pub async fn opflex_device_changed(&self, obj: &ApicObject) -> Result<(), ControllerError> {
        if obj.attr_str("domName") != self.config.aci_vmm_domain
            || obj.attr_str("ctrlrName") != self.config.aci_vmm_controller
        {
            debug!("Ignoring opflex device {} of another VMM domain", obj.dn());
            return Ok(());
        }
        let att = FabricAttachment::from_odev(obj);
        if att.dn.is_empty() || att.host_name.is_empty() {
            warn!("Skipping opflex device without dn or hostName: {:?}", obj.attributes);
            return Ok(());
        }

        let nodes = apply_device_changed(&mut self.lock_state().node_fabric_paths, &att);
        self.fabric_paths_updated(&nodes).await
    }

    pub async fn opflex_device_deleted(&self, dn: &str) -> Result<(), ControllerError> {
        let nodes = apply_device_deleted(&mut self.lock_state().node_fabric_paths, dn);
        self.fabric_paths_updated(&nodes).await
    }

    async fn fabric_paths_updated(&self, nodes: &[String]) -> Result<(), ControllerError> {
        if nodes.is_empty() {
            return Ok(());
        }
        info!("Fabric paths changed for node(s) {}", nodes.join(", "));

        self.queue_services_for_nodes(nodes);
        if !self.config.apic_sync_enabled {
            return Ok(());
        }
        self.update_device_cluster().await?;

        let has_snat = !self.lock_state().snat_policies.is_empty();
        if has_snat {
            self.update_snat_graph().await?;
        }
        Ok(())
    }

    /// Rewrite the shared device cluster and service graph from the
    /// current fabric paths
    pub async fn update_device_cluster(&self) -> Result<(), ControllerError> {
        let paths: BTreeMap<String, String> = {
            let state = self.lock_state();
            state
                .node_fabric_paths
                .keys()
                .filter_map(|node| {
                    state
                        .fabric_path_for_node(node)
                        .map(|path| (node.clone(), path.to_string()))
                })
                .collect()
        };
        let graph_name = self.name_for("svc", "global");
        let slice = service_graph::global_objects(&self.config, &graph_name, &paths);
        self.write_objects(&graph_name, slice).await
    }

    /// Queue every service with an Endpoints address on one of `nodes`
    pub fn queue_services_for_nodes(&self, nodes: &[String]) {
        let nodes: BTreeSet<&str> = nodes.iter().map(String::as_str).collect();
        for endpoints in self.stores.endpoints.state() {
            let on_node = endpoints
                .subsets
                .iter()
                .flatten()
                .flat_map(|s| s.addresses.iter().flatten())
                .any(|a| a.node_name.as_deref().is_some_and(|n| nodes.contains(n)));
            if !on_node {
                continue;
            }
            if let (Some(ns), Some(name)) = (endpoints.metadata.namespace.as_deref(), endpoints.metadata.name.as_deref()) {
                self.queues.services.add(&format!("{}/{}", ns, name));
            }
        }
    }
}
