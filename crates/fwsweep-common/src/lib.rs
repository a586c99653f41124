//! Shared building blocks for the fwsweep deletion engine.
//!
//! This crate holds everything the client and orchestrator crates agree on:
//!
//! - [`FirewallError`]: the error taxonomy for remote firewall operations
//! - [`ConnectionProfile`] / [`FirewallKind`]: how to reach a management plane
//! - [`IpObject`] / [`Group`] / [`Rule`]: the remote configuration entities
//! - [`DeletionPlan`]: the per-run mutation plan computed by the resolver
//! - [`DeletionRequest`] / [`DeletionResult`]: the external task boundary
//! - [`RetryPolicy`]: bounded backoff for transient connection errors
//! - [`ConnectionLocks`]: keyed serialization of runs per firewall identity
//!
//! Nothing in this crate performs I/O.

mod error;
mod lock;
mod plan;
mod profile;
mod result;
mod retry;
mod types;

pub use error::{FirewallError, FirewallResult};
pub use lock::ConnectionLocks;
pub use plan::DeletionPlan;
pub use profile::{ConnectionProfile, FirewallKind};
pub use result::{ConnectionParams, DeletionDetails, DeletionRequest, DeletionResult};
pub use retry::RetryPolicy;
pub use types::{Group, IpObject, Rule, RuleField};
