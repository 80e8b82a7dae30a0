//! Kubernetes resource watchers.
//!
//! Every watched kind runs through the same `watch_resource()` helper: a
//! `kube_runtime` watcher feeds a reflector store and each touched object is
//! mapped to a queue key. Handlers read the store, so a deleted object simply
//! shows up as a missing key.

use crate::error::ControllerError;
use crate::queue::QueueKind;
use crate::reconciler::{Queues, Reconciler, object_key};
use crds::{NetflowPolicy, SnatPolicy};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Endpoints, Service};
use kube::Api;
use kube_runtime::reflector::store::Writer;
use kube_runtime::{WatchStreamExt, watcher};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Anything the forward pipeline watches
#[derive(Debug, Clone)]
pub enum WatchedResource {
    Service(Service),
    Endpoints(Endpoints),
    SnatPolicy(SnatPolicy),
    NetflowPolicy(NetflowPolicy),
}

impl WatchedResource {
    /// Queue and key that reconcile this object. Endpoints share the key of
    /// their service.
    pub fn queue_key(&self) -> Option<(QueueKind, String)> {
        match self {
            Self::Service(s) => object_key(&s.metadata).map(|k| (QueueKind::Service, k)),
            Self::Endpoints(e) => object_key(&e.metadata).map(|k| (QueueKind::Service, k)),
            Self::SnatPolicy(p) => p.metadata.name.clone().map(|n| (QueueKind::Snat, n)),
            Self::NetflowPolicy(p) => p.metadata.name.clone().map(|n| (QueueKind::Netflow, n)),
        }
    }
}

/// Add the object's key to its queue. Objects without a usable key are
/// dropped.
pub fn enqueue(queues: &Queues, resource: &WatchedResource) {
    match resource.queue_key() {
        Some((kind, key)) => {
            debug!("Queueing {} {}", kind.as_str(), key);
            queues.for_kind(kind).add(&key);
        }
        None => warn!("Could not derive a queue key, dropping event for {:?}", resource),
    }
}

/// Keep `writer`'s store in sync with the cluster and queue every touched
/// object until `token` is cancelled
pub async fn watch_resource<K>(
    api: Api<K>,
    writer: Writer<K>,
    reconciler: Arc<Reconciler>,
    wrap: fn(K) -> WatchedResource,
    token: CancellationToken,
    resource_name: &'static str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    info!("Starting {} watcher", resource_name);

    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .touched_objects();
    tokio::pin!(stream);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                info!("{} watcher stopping", resource_name);
                return Ok(());
            }
            item = stream.next() => match item {
                Some(Ok(obj)) => enqueue(&reconciler.queues, &wrap(obj)),
                // the backoff layer retries; keep going
                Some(Err(e)) => warn!("{} watch error: {}", resource_name, e),
                None => {
                    return Err(ControllerError::Watch(format!("{} watch stream ended", resource_name)));
                }
            },
        }
    }
}
