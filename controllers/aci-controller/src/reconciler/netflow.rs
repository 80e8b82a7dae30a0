//! NetflowPolicy reconciliation: one flow exporter per policy, attached to
//! the VMM domain's vSwitch policy container.

use super::{Action, Reconciler};
use crate::error::ControllerError;
use apic_client::{ApicSlice, objects};
use crds::FlowSamplingPolicy;
use kube_runtime::reflector::ObjectRef;
use tracing::debug;

impl Reconciler {
    pub async fn handle_netflow(&self, name: &str) -> Result<Action, ControllerError> {
        let key = self.name_for("nfp", name);
        let Some(policy) = self.stores.netflow_policies.get(&ObjectRef::new(name)) else {
            debug!("NetflowPolicy {} deleted", name);
            self.clear_objects(&key).await?;
            return Ok(Action::Done);
        };

        let slice = exporter_objects(
            &self.config.aci_vmm_type,
            &self.config.aci_vmm_domain,
            &key,
            &policy.spec.flow_sampling_policy,
        );
        self.write_objects(&key, slice).await?;
        Ok(Action::Done)
    }
}

/// `ver` attribute for a sampling protocol
fn exporter_version(version: &str) -> Option<&'static str> {
    match version {
        "netflow" => Some("v5"),
        "ipfix" => Some("v9"),
        _ => None,
    }
}

pub(crate) fn exporter_objects(
    vmm_type: &str,
    vmm_domain: &str,
    name: &str,
    policy: &FlowSamplingPolicy,
) -> ApicSlice {
    let mut exporter = objects::netflow_vmm_exporter_pol(name)
        .with_attr("dstAddr", policy.dst_addr.as_str())
        .with_attr("dstPort", policy.dst_port.to_string());
    if let Some(ver) = exporter_version(&policy.version) {
        exporter.set_attr("ver", ver);
    }

    let mut cont = objects::vmm_vswitch_policy_cont(vmm_type, vmm_domain);
    cont.add_child(
        objects::vmm_rs_vswitch_exporter_pol(vmm_type, vmm_domain, exporter.dn())
            .with_attr("activeFlowTimeOut", policy.active_flow_time_out.to_string())
            .with_attr("idleFlowTimeOut", policy.idle_flow_time_out.to_string()),
    );
    vec![exporter, cont]
}
