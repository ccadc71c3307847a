//! traffic-install provisions the cluster-side pieces of the traffic manager:
//! the TLS secret of the agent-injection webhook, the manager's cluster role binding,
//! and the manager deployment itself.
//!
//! It is driven by one-shot install, upgrade and uninstall runs rather than a watch loop.
//! A run builds a [`Scope`] and hands an ordered [`Resources`] batch to
//! [`Resources::ensure`] or [`Resources::delete`]. Each resource probes for its object and
//! is either created or brought up to date, so a run can be repeated safely after a failure.

pub mod agent;
pub mod certs;
pub mod cluster;
pub mod config;
mod error;
pub mod install;
pub mod intercept;
pub mod net_override;
pub mod resource;
mod scope;

pub use cluster::{ApiError, ClusterApi, KubeCluster, QualifiedName};
pub use config::Env;
pub use error::{Error, Op};
pub use resource::{ensure, Resource, Resources};
pub use scope::Scope;
