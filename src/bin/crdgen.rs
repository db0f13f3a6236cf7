//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions of every kind managed by the controller
//! as a multi-document YAML stream.
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/all.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::CustomResourceExt;
use vault_engine_controller::crd::{AwsRole, AzureRole, DatabaseRole, GcpRole, VaultServer};

fn main() -> anyhow::Result<()> {
    let crds = [
        AwsRole::crd(),
        AzureRole::crd(),
        GcpRole::crd(),
        DatabaseRole::crd(),
        VaultServer::crd(),
    ];

    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
