//! Print the CRD manifests as a multi-document YAML stream

use crds::{NetflowPolicy, SnatPolicy};
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    let docs = [
        serde_yaml::to_string(&SnatPolicy::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize SnatPolicy CRD: {}", e))?,
        serde_yaml::to_string(&NetflowPolicy::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize NetflowPolicy CRD: {}", e))?,
    ];
    for doc in docs {
        println!("---\n{doc}");
    }
    Ok(())
}
