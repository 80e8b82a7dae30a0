//! Intent records extracted from the fabric.

use serde::{Deserialize, Serialize};

/// Endpoint group and the contracts it provides and consumes.
/// Contracts are named `<tenant>/<contract>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epg {
    pub tenant: String,
    pub name: String,
    pub dn: String,
    pub provided: Vec<String>,
    pub consumed: Vec<String>,
}

impl Epg {
    pub fn key(&self) -> String {
        format!("{}/{}", self.tenant, self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub tenant: String,
    pub name: String,
    /// Filter names, see [`crate::dn::filter_name`]
    pub filters: Vec<String>,
}

impl Contract {
    pub fn key(&self) -> String {
        format!("{}/{}", self.tenant, self.name)
    }
}

/// Destination port range. Either end is unset when the fabric value is
/// not a number (`unspecified`, `http`, ...).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    pub ports: PortSpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    pub name: String,
    pub rules: Vec<FilterRule>,
}

/// Host-protection policy, decoded from the fabric's `hostprotPol` tree.
///
/// Only the classes below are kept; unknown children decode to empty
/// entries and are skipped by the accessors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    #[serde(rename = "hostprotPol")]
    pub host_prot_pol: HostprotPol,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostprotPol {
    pub attributes: PolicyAttributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PolicyChild>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyAttributes {
    pub dn: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyChild {
    #[serde(rename = "hostprotSubj", default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<HostprotSubj>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostprotSubj {
    pub attributes: SubjectAttributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<SubjectChild>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectAttributes {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectChild {
    #[serde(rename = "hostprotRule", default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<HostprotRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostprotRule {
    pub attributes: RuleAttributes,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RuleChild>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAttributes {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub ethertype: String,
    #[serde(default)]
    pub protocol: String,
    #[serde(default)]
    pub from_port: String,
    #[serde(default)]
    pub to_port: String,
    #[serde(default)]
    pub conn_track: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleChild {
    #[serde(rename = "hostprotRemoteIp", default, skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<RemoteIp>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIp {
    pub attributes: RemoteIpAttributes,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteIpAttributes {
    #[serde(default)]
    pub addr: String,
}

impl NetworkPolicy {
    pub fn dn(&self) -> &str {
        &self.host_prot_pol.attributes.dn
    }

    /// Every rule of every subject
    pub fn rules(&self) -> impl Iterator<Item = &HostprotRule> {
        self.host_prot_pol
            .children
            .iter()
            .filter_map(|c| c.subject.as_ref())
            .flat_map(|s| s.children.iter().filter_map(|c| c.rule.as_ref()))
    }
}

impl HostprotRule {
    pub fn remote_ips(&self) -> impl Iterator<Item = &str> {
        self.children
            .iter()
            .filter_map(|c| c.remote_ip.as_ref())
            .map(|r| r.attributes.addr.as_str())
    }
}
