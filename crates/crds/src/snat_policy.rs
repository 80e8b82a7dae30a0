//! SnatPolicy CRD
//!
//! Cluster-scoped egress SNAT policy. Every policy feeds one shared fabric
//! graph; the controller caches each `spec` by policy name.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(group = "aci.snat", version = "v1", kind = "SnatPolicy", plural = "snatpolicies")]
#[serde(rename_all = "camelCase")]
pub struct SnatPolicySpec {
    /// Addresses pods matching the selector are translated to
    #[serde(default)]
    pub snat_ip: Vec<String>,

    /// Pods the policy applies to
    #[serde(default)]
    pub selector: PodSelector,

    /// Source port ranges handed out per node; empty means any port
    #[serde(default)]
    pub port_range: Vec<PortRange>,

    /// "tcp", "udp"; empty means both
    #[serde(default)]
    pub protocols: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PodSelector {
    #[serde(default)]
    pub labels: Vec<SelectorLabel>,
    #[serde(default)]
    pub deployment: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct SelectorLabel {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct PortRange {
    #[serde(default)]
    pub start: u16,
    #[serde(default)]
    pub end: u16,
}
