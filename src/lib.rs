//! Vault Engine Controller Library
//!
//! Reconciles Vault secrets engines, dynamic-credential roles and Vault
//! servers declared as Kubernetes custom resources.
//!
//! - `controller`: the reconciliation and finalizer engine (queue, dispatcher,
//!   strategies, finalizer lifecycle, status reporting)
//! - `backend`: Vault HTTP client and Kubernetes topology behind capability traits
//! - `store`: Kubernetes access to resources and Secrets
//! - `crd`: custom resource types
//! - `runtime`: process wiring used by the controller binary

pub mod backend;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod runtime;
pub mod server;
pub mod store;
