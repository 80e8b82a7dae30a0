//! Fabric object naming.
//!
//! Every object the controller writes is named after the Kubernetes key it
//! came from. APIC names are limited to 63 characters, so long keys are
//! replaced by a truncated SHA-256 digest.

use sha2::{Digest, Sha256};

const MAX_NAME_LEN: usize = 64;

/// `"<prefix>_<ktype>_<key>"` with `/` in the key replaced by `_`
pub fn aci_name_for_key(prefix: &str, ktype: &str, key: &str) -> String {
    let name = format!("{}_{}_{}", prefix, ktype, key.replace('/', "_"));
    if name.len() < MAX_NAME_LEN {
        return name;
    }
    let digest = hex::encode(Sha256::digest(key.as_bytes()));
    format!("{}_{}_{}", prefix, ktype, &digest[..16])
}
