//! Firewall management-plane clients.
//!
//! One capability trait, [`FirewallClient`], hides two very different
//! configuration-management protocols behind a single contract:
//!
//! - [`CheckpointFirewall`]: Check Point Management API — session token,
//!   staged mutations, explicit publish/discard.
//! - [`FortinetFirewall`]: FortiGate FortiOS REST API — token auth,
//!   vdom-scoped, every mutation applies immediately.
//! - [`MemoryFirewall`]: deterministic in-memory fixture graph used for
//!   development and as the conformance reference for the orchestrator.
//!
//! [`create_client`] selects the implementation from a
//! [`ConnectionProfile`]; it is the only place that branches on the vendor.
//!
//! [`ConnectionProfile`]: fwsweep_common::ConnectionProfile

mod checkpoint;
mod client;
mod fortinet;
mod memory;

pub use checkpoint::CheckpointFirewall;
pub use client::{create_client, FirewallClient};
pub use fortinet::FortinetFirewall;
pub use memory::{FixtureState, MemoryFirewall};
