//! # CRD Generator
//!
//! Prints the `PacketCluster` and `PacketMachine` CustomResourceDefinitions
//! as a multi-document YAML stream.
//!
//! ```bash
//! cargo run -p crds --bin crdgen > config/crd/packet.yaml
//! cargo run -p crds --bin crdgen | kubectl apply -f -
//! ```

use crds::{PacketCluster, PacketMachine};
use kube::core::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    for crd in [PacketCluster::crd(), PacketMachine::crd()] {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
