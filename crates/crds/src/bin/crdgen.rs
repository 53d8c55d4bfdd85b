//! # CRD Generator
//!
//! Prints the CustomResourceDefinition YAML for every registered kind.
//!
//! ```bash
//! cargo run -p crds --bin crdgen > config/crd/virtualmachines.yaml
//! cargo run -p crds --bin crdgen | kubectl apply -f -
//! ```

use anyhow::Context;
use crds::KindRegistry;

fn main() -> anyhow::Result<()> {
    let registry = KindRegistry::with_defaults();
    let mut documents = Vec::with_capacity(registry.len());
    for kind in registry.kinds() {
        let yaml = serde_yaml::to_string(&kind.definition)
            .with_context(|| format!("failed to serialize CRD for {}", kind.kind))?;
        documents.push(yaml);
    }
    print!("{}", documents.join("---\n"));
    Ok(())
}
