//! Naming rules for fabric distinguished names.
//!
//! Tenant-scoped objects live at `uni/tn-<tenant>/...`; the helpers here
//! pull the pieces the intent records are keyed by.

const TENANT_PREFIX: &str = "uni/tn-";
const EPG_PREFIX: &str = "cloudepg-";
const CONTRACT_PREFIX: &str = "brc-";

/// Placeholder name for filters whose DN does not have the expected shape
pub const UNKNOWN_FILTER: &str = "unknown";

/// Tenant named by the DN, empty when the DN is not below a tenant
pub fn tenant(dn: &str) -> &str {
    match dn.strip_prefix(TENANT_PREFIX) {
        Some(rest) => match rest.split_once('/') {
            Some((tenant, _)) => tenant,
            None => "",
        },
        None => "",
    }
}

/// EPG name from `uni/tn-<t>/cloudapp-<a>/cloudepg-<name>`
pub fn epg_name(dn: &str) -> &str {
    dn.split('/')
        .nth(3)
        .map(|segment| segment.strip_prefix(EPG_PREFIX).unwrap_or(segment))
        .unwrap_or_default()
}

/// `<tenant>/<rn>` for a three-segment filter DN, otherwise `unknown`
pub fn filter_name(dn: &str) -> String {
    let parts: Vec<&str> = dn.split('/').collect();
    if parts.len() != 3 {
        return UNKNOWN_FILTER.to_string();
    }
    format!("{}/{}", tenant(dn), parts[2])
}

/// Tenant and contract name from `uni/tn-<t>/brc-<name>`
pub fn contract_name(dn: &str) -> Option<(&str, &str)> {
    let parts: Vec<&str> = dn.split('/').collect();
    if parts.len() != 3 {
        return None;
    }
    let name = parts[2].strip_prefix(CONTRACT_PREFIX).unwrap_or(parts[2]);
    Some((tenant(dn), name))
}
