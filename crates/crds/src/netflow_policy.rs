//! NetflowPolicy CRD
//!
//! Cluster-scoped flow-export policy translated into a VMM exporter policy.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(group = "aci.netflow", version = "v1alpha", kind = "NetflowPolicy", plural = "netflowpolicies")]
#[serde(rename_all = "camelCase")]
pub struct NetflowPolicySpec {
    pub flow_sampling_policy: FlowSamplingPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FlowSamplingPolicy {
    /// Collector address
    pub dst_addr: String,

    /// Collector port
    #[serde(default = "default_dst_port")]
    pub dst_port: u16,

    /// "netflow" or "ipfix"
    #[serde(default = "default_version")]
    pub version: String,

    /// Seconds
    #[serde(default = "default_active_flow_time_out")]
    pub active_flow_time_out: u32,

    /// Seconds
    #[serde(default = "default_idle_flow_time_out")]
    pub idle_flow_time_out: u32,
}

fn default_dst_port() -> u16 {
    2055
}

fn default_version() -> String {
    "netflow".to_string()
}

fn default_active_flow_time_out() -> u32 {
    60
}

fn default_idle_flow_time_out() -> u32 {
    15
}
