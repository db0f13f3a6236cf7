//! # Vault Engine Controller
//!
//! Kubernetes controller that provisions Vault secrets engines and roles
//! (AWS, Azure, GCP, databases) and deploys Vault servers.
//!
//! Configuration is read from environment variables; see
//! [`vault_engine_controller::config::ControllerConfig`].

use anyhow::Result;

#[tokio::main]
async fn main() -> Result<()> {
    vault_engine_controller::runtime::run().await
}
