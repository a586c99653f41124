//! fwsweepd - Firewall address-object deletion daemon
//!
//! Deleting an address object from a firewall fails if anything still
//! references it. This crate resolves those references (group memberships,
//! nested groups, rule endpoints), plans the minimal cleanup, and applies
//! it in an order every vendor accepts: member removals, emptied-group
//! deletions, rule updates, rule deletions, and the object itself last.
//!
//! [`DeletionOrchestrator`] drives one run per request; [`ReferenceResolver`]
//! computes the plan. Vendor access goes through the `fwsweep-client`
//! capability trait, so orchestration is identical for staged (Check Point)
//! and immediate-apply (FortiGate) platforms.

pub mod orch;
pub mod resolver;

pub use orch::{DeletionOrchestrator, OrchConfig, RunState};
pub use resolver::ReferenceResolver;
