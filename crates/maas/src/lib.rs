//! Reconciliation core of the MAAS bare metal provider.
//!
//! This crate drives machines managed by [MAAS](https://maas.io) towards a
//! declared configuration: it commissions registered machines, rebuilds
//! their network and storage layouts, reconciles tags, and allocates and
//! deploys machines from the pool. Everything MAAS-specific on the wire is
//! behind the [`Gateway`] trait.
//!
//! # Example
//!
//! ```rust,ignore
//! use maas::{MaasProvider, ProviderConfig, ResourceKind};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ProviderConfig::load("maas.yaml".as_ref())?;
//!     let provider = MaasProvider::configure(&config, &connector)?;
//!
//!     // Commission a machine and lay out its disks
//!     let outcome = provider
//!         .create(ResourceKind::Machine, serde_json::json!({
//!             "mac_address": "52:54:00:aa:bb:cc",
//!             "hostname": "node-1",
//!             "domain": "maas",
//!         }))
//!         .await?;
//!
//!     for warning in &outcome.warnings {
//!         eprintln!("warning: {warning}");
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod gateway;
pub mod logging;
pub mod model;
pub mod network;
pub mod poller;
pub mod provider;
pub mod resources;
pub mod settings;
pub mod state;
pub mod storage;
pub mod tags;

pub use error::{Outcome, ProviderError, Warning};
pub use gateway::{Gateway, GatewayError};
pub use model::{Machine, MachineStatus};
pub use poller::{wait_for_state, StateChangeConf, WaitTiming};
pub use provider::{GatewayConnector, MaasProvider, ResourceKind};
pub use resources::{DeploymentResource, MachineResource, Resource};
pub use settings::{Endpoint, ProviderConfig, Timeouts};
pub use state::MachineState;
