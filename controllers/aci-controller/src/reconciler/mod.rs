//! Reconciliation logic for the forward pipeline.
//!
//! This module is organized by the kind of object being reconciled:
//! - `services`: LoadBalancer address allocation, per-service graphs, VMM visibility
//! - `snat`: the shared SNAT graph
//! - `netflow`: flow exporter policies
//! - `fabric_path`: node attachments reported by the fabric
//! - `service_graph`: pure builders for the fabric object graphs

pub mod fabric_path;
pub mod netflow;
pub mod service_graph;
pub mod services;
pub mod snat;

#[cfg(test)]
mod fabric_path_test;
#[cfg(test)]
mod netflow_test;
#[cfg(test)]
mod services_test;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::names::aci_name_for_key;
use crate::queue::{QueueKind, WorkQueue};
use crate::service_writer::ServiceWriter;
use crate::state::ControllerState;
use apic_client::{ApicClientTrait, ApicSlice};
use crds::{NetflowPolicy, SnatPolicy};
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube_runtime::reflector::{ObjectRef, Store};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Outcome of one reconciliation. The worker loop owns re-submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Done,
    /// Run again after the key's backoff delay
    Requeue,
}

/// Reflector caches of every watched kind
#[derive(Clone)]
pub struct Stores {
    pub services: Store<Service>,
    pub endpoints: Store<Endpoints>,
    pub snat_policies: Store<SnatPolicy>,
    pub netflow_policies: Store<NetflowPolicy>,
}

/// One work queue per pipeline
pub struct Queues {
    pub services: Arc<WorkQueue>,
    pub snat: Arc<WorkQueue>,
    pub netflow: Arc<WorkQueue>,
}

impl Queues {
    pub fn new() -> Self {
        Self {
            services: Arc::new(WorkQueue::new(QueueKind::Service)),
            snat: Arc::new(WorkQueue::new(QueueKind::Snat)),
            netflow: Arc::new(WorkQueue::new(QueueKind::Netflow)),
        }
    }

    pub fn for_kind(&self, kind: QueueKind) -> &Arc<WorkQueue> {
        match kind {
            QueueKind::Service => &self.services,
            QueueKind::Snat => &self.snat,
            QueueKind::Netflow => &self.netflow,
        }
    }

    pub fn shutdown_all(&self) {
        self.services.shutdown();
        self.snat.shutdown();
        self.netflow.shutdown();
    }
}

impl Default for Queues {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns the controller state and every outbound collaborator.
pub struct Reconciler {
    pub(crate) config: ControllerConfig,
    state: Mutex<ControllerState>,
    pub(crate) apic: Arc<dyn ApicClientTrait>,
    pub(crate) services_api: Arc<dyn ServiceWriter>,
    pub(crate) stores: Stores,
    pub(crate) queues: Queues,
    pub(crate) metrics: Metrics,
}

impl Reconciler {
    pub fn new(
        config: ControllerConfig,
        apic: Arc<dyn ApicClientTrait>,
        services_api: Arc<dyn ServiceWriter>,
        stores: Stores,
        metrics: Metrics,
    ) -> Result<Self, ControllerError> {
        let state = ControllerState::new(&config)?;
        Ok(Self {
            config,
            state: Mutex::new(state),
            apic,
            services_api,
            stores,
            queues: Queues::new(),
            metrics,
        })
    }

    /// Never hold the guard across an `.await`
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn name_for(&self, ktype: &str, key: &str) -> String {
        aci_name_for_key(&self.config.aci_prefix, ktype, key)
    }

    pub(crate) async fn write_objects(&self, key: &str, slice: ApicSlice) -> Result<(), ControllerError> {
        debug!("Writing {} object(s) under {}", slice.len(), key);
        self.apic.write_apic_objects(key, slice).await?;
        self.metrics.record_fabric_write("write");
        Ok(())
    }

    pub(crate) async fn clear_objects(&self, key: &str) -> Result<(), ControllerError> {
        debug!("Clearing objects under {}", key);
        self.apic.clear_apic_objects(key).await?;
        self.metrics.record_fabric_write("clear");
        Ok(())
    }

    pub(crate) fn get_service(&self, key: &str) -> Option<Arc<Service>> {
        let (ns, name) = split_key(key)?;
        self.stores.services.get(&ObjectRef::new(name).within(ns))
    }

    pub(crate) fn get_endpoints(&self, key: &str) -> Option<Arc<Endpoints>> {
        let (ns, name) = split_key(key)?;
        self.stores.endpoints.get(&ObjectRef::new(name).within(ns))
    }

    /// Nodes hosting a ready backend of the service
    pub(crate) fn service_nodes(&self, key: &str) -> BTreeSet<String> {
        self.get_endpoints(key)
            .map(|eps| {
                eps.subsets
                    .iter()
                    .flatten()
                    .flat_map(|s| s.addresses.iter().flatten())
                    .filter_map(|a| a.node_name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Names of the Pods behind the service
    pub(crate) fn service_pods(&self, key: &str) -> Vec<String> {
        self.get_endpoints(key)
            .map(|eps| {
                eps.subsets
                    .iter()
                    .flatten()
                    .flat_map(|s| s.addresses.iter().flatten())
                    .filter_map(|a| a.target_ref.as_ref())
                    .filter(|r| r.kind.as_deref() == Some("Pod"))
                    .filter_map(|r| r.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rebuild allocator state from every live service. Must run before
    /// any worker starts.
    pub fn recover(&self) {
        let services = self.stores.services.state();
        let mut state = self.lock_state();
        for service in &services {
            if let Some(key) = object_key(&service.metadata) {
                state.recover_service(&key, service);
            }
        }
        info!("Recovered address state from {} service(s)", services.len());
    }

    /// Write the service bridge domain
    pub async fn write_static_objects(&self) -> Result<(), ControllerError> {
        if !self.config.apic_sync_enabled {
            return Ok(());
        }
        let key = format!("{}_service_static", self.config.aci_prefix);
        let bd_name = self.name_for("bd", "kubernetes-service");
        self.write_objects(&key, service_graph::static_service_objects(&self.config, &bd_name))
            .await
    }

    /// Queue every cached object
    pub fn full_sync(&self) {
        let mut count = 0;
        for service in self.stores.services.state() {
            if let Some(key) = object_key(&service.metadata) {
                self.queues.services.add(&key);
                count += 1;
            }
        }
        for policy in self.stores.snat_policies.state() {
            if let Some(name) = policy.metadata.name.as_deref() {
                self.queues.snat.add(name);
                count += 1;
            }
        }
        for policy in self.stores.netflow_policies.state() {
            if let Some(name) = policy.metadata.name.as_deref() {
                self.queues.netflow.add(name);
                count += 1;
            }
        }
        info!("Full resync queued {} object(s)", count);
    }

    /// Dispatch one key to its handler and count the outcome
    pub async fn process(&self, kind: QueueKind, key: &str) -> Result<Action, ControllerError> {
        let result = match kind {
            QueueKind::Service => self.handle_service(key).await,
            QueueKind::Snat => self.handle_snat(key).await,
            QueueKind::Netflow => self.handle_netflow(key).await,
        };
        let outcome = match &result {
            Ok(Action::Done) => "done",
            Ok(Action::Requeue) => "requeue",
            Err(_) => "error",
        };
        self.metrics.record_reconcile(kind.as_str(), outcome);
        result
    }
}

/// `namespace/name`, or just `name` for cluster-scoped objects
pub fn object_key(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> Option<String> {
    let name = meta.name.as_deref()?;
    Some(match meta.namespace.as_deref() {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    })
}

fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('/')
}
