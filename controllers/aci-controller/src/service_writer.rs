//! Writes back to Service objects.
//!
//! The controller only ever touches two things on a Service: the
//! load-balancer ingress list in its status and the node endpoint
//! annotation. Both are merge patches.

use crate::error::ControllerError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, Service};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

#[async_trait]
pub trait ServiceWriter: Send + Sync {
    /// Replace `status.loadBalancer.ingress`
    async fn patch_ingress(
        &self,
        namespace: &str,
        name: &str,
        ingress: Vec<LoadBalancerIngress>,
    ) -> Result<(), ControllerError>;

    /// Set one annotation
    async fn patch_annotation(&self, namespace: &str, name: &str, key: &str, value: &str) -> Result<(), ControllerError>;
}

/// [`ServiceWriter`] backed by the Kubernetes API
pub struct KubeServiceWriter {
    client: Client,
}

impl KubeServiceWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Service> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ServiceWriter for KubeServiceWriter {
    async fn patch_ingress(
        &self,
        namespace: &str,
        name: &str,
        ingress: Vec<LoadBalancerIngress>,
    ) -> Result<(), ControllerError> {
        let patch = serde_json::json!({
            "status": {"loadBalancer": {"ingress": ingress}}
        });
        self.api(namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ControllerError::RemoteWrite(format!("status of {}/{}: {}", namespace, name, e)))?;
        debug!("Patched load balancer status of {}/{}", namespace, name);
        Ok(())
    }

    async fn patch_annotation(&self, namespace: &str, name: &str, key: &str, value: &str) -> Result<(), ControllerError> {
        let mut annotations = serde_json::Map::new();
        annotations.insert(key.to_string(), serde_json::Value::from(value));
        let patch = serde_json::json!({
            "metadata": {"annotations": annotations}
        });
        self.api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ControllerError::RemoteWrite(format!("annotation of {}/{}: {}", namespace, name, e)))?;
        debug!("Patched {} annotation of {}/{}", key, namespace, name);
        Ok(())
    }
}

/// One recorded write
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedWrite {
    Ingress { key: String, ips: Vec<String> },
    Annotation { key: String, name: String, value: String },
}

/// Records writes instead of sending them
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingServiceWriter {
    writes: std::sync::Mutex<Vec<RecordedWrite>>,
    fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl RecordingServiceWriter {
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.writes.lock().unwrap().clear();
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_fail(&self) -> Result<(), ControllerError> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(ControllerError::RemoteWrite("recording writer failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait]
impl ServiceWriter for RecordingServiceWriter {
    async fn patch_ingress(
        &self,
        namespace: &str,
        name: &str,
        ingress: Vec<LoadBalancerIngress>,
    ) -> Result<(), ControllerError> {
        self.check_fail()?;
        self.writes.lock().unwrap().push(RecordedWrite::Ingress {
            key: format!("{}/{}", namespace, name),
            ips: ingress.into_iter().filter_map(|i| i.ip).collect(),
        });
        Ok(())
    }

    async fn patch_annotation(&self, namespace: &str, name: &str, key: &str, value: &str) -> Result<(), ControllerError> {
        self.check_fail()?;
        self.writes.lock().unwrap().push(RecordedWrite::Annotation {
            key: format!("{}/{}", namespace, name),
            name: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }
}
