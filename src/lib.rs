//! Bifrost - desires Cloud Foundry workloads on Kubernetes
//!
//! Long-running processes (LRPs) become StatefulSets, one-off tasks become
//! Jobs. The cluster API is the only state: every read goes live and every
//! write is a create, patch or delete against it.
//!
//! # Modules
//!
//! - [`convert`] - Turns control-plane requests into canonical descriptors
//! - [`lrp`] - LRP desirer: StatefulSets, disruption budgets, pull secrets
//! - [`task`] - Task desirer: Jobs, task secrets, completion callbacks
//! - [`bifrost`] - The façade transport handlers and controllers call
//! - [`crd`] - The `LRP` custom resource
//! - [`controller`] - LRP controller and task completion reporter
//! - [`config`] - YAML configuration
//! - [`registry`] - Private registry pull secrets

#![deny(missing_docs)]

pub mod bifrost;
pub mod config;
pub mod controller;
pub mod convert;
pub mod crd;
pub mod lrp;
pub mod registry;
pub mod task;

#[cfg(test)]
mod testing;

pub use bifrost::Bifrost;
pub use bifrost_common::{Error, LrpIdentifier, Result};
pub use config::BifrostConfig;
