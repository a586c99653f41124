//! The firewall capability trait and the profile-driven factory.

use std::collections::BTreeSet;

use async_trait::async_trait;

use fwsweep_common::{
    ConnectionProfile, FirewallKind, FirewallResult, Group, IpObject, Rule, RuleField,
};

use crate::checkpoint::CheckpointFirewall;
use crate::fortinet::FortinetFirewall;
use crate::memory::MemoryFirewall;

/// Primitive remote operations against one firewall management plane.
///
/// Implementations must report failures through the shared error taxonomy
/// and must never panic on remote errors. The stage/commit and
/// immediate-apply models are unified behind [`commit`](Self::commit): a
/// real publish for the former, an always-successful no-op for the latter.
/// Consequently [`discard`](Self::discard) can roll back only staged
/// vendors — applied changes on immediate-apply vendors stay applied.
///
/// # Lifecycle
///
/// A client lives for exactly one run: construct, `authenticate`, operate,
/// then `disconnect` on every exit path, success or failure.
#[async_trait]
pub trait FirewallClient: Send + Sync {
    /// The platform this client talks to. Diagnostics only — orchestration
    /// logic never branches on it.
    fn kind(&self) -> FirewallKind;

    /// Establishes a session. Never degrades to anonymous access.
    async fn authenticate(&mut self) -> FirewallResult<()>;

    /// Looks up an IP object by identifier.
    async fn find_object(&self, id: &str) -> FirewallResult<IpObject>;

    /// Returns every group whose direct membership includes `member_id`.
    ///
    /// Works for object ids and group ids alike, which is what makes
    /// nested-group discovery possible.
    async fn find_groups_containing(&self, member_id: &str) -> FirewallResult<Vec<Group>>;

    /// Returns every rule whose source or destination refs intersect `ids`.
    async fn find_rules_referencing(&self, ids: &BTreeSet<String>) -> FirewallResult<Vec<Rule>>;

    /// Removes one member from a group.
    async fn remove_member_from_group(
        &mut self,
        group_id: &str,
        member_id: &str,
    ) -> FirewallResult<()>;

    /// Deletes a group. Precondition: the group is empty.
    async fn delete_group(&mut self, group_id: &str) -> FirewallResult<()>;

    /// Removes one reference from one endpoint field of a rule.
    async fn update_rule_remove_reference(
        &mut self,
        rule_id: &str,
        field: RuleField,
        ref_id: &str,
    ) -> FirewallResult<()>;

    /// Deletes a rule.
    async fn delete_rule(&mut self, rule_id: &str) -> FirewallResult<()>;

    /// Deletes the IP object itself.
    async fn delete_object(&mut self, object_id: &str) -> FirewallResult<()>;

    /// Publishes staged changes. Success no-op on immediate-apply vendors.
    async fn commit(&mut self) -> FirewallResult<()>;

    /// Drops staged changes. No-op on immediate-apply vendors, where
    /// already-applied mutations cannot be rolled back.
    async fn discard(&mut self) -> FirewallResult<()>;

    /// Tears down the session. Invoked on every run exit; must tolerate
    /// prior errors and half-open sessions.
    async fn disconnect(&mut self) -> FirewallResult<()>;
}

/// Builds the client matching the profile's platform.
///
/// The only vendor branch in the codebase.
pub fn create_client(profile: &ConnectionProfile) -> FirewallResult<Box<dyn FirewallClient>> {
    match profile.kind {
        FirewallKind::Checkpoint => Ok(Box::new(CheckpointFirewall::new(profile.clone())?)),
        FirewallKind::Fortinet => Ok(Box::new(FortinetFirewall::new(profile.clone())?)),
        FirewallKind::Test => Ok(Box::new(MemoryFirewall::with_sample_data(profile.clone()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_selects_by_kind() {
        for (kind, expected) in [
            (FirewallKind::Checkpoint, FirewallKind::Checkpoint),
            (FirewallKind::Fortinet, FirewallKind::Fortinet),
            (FirewallKind::Test, FirewallKind::Test),
        ] {
            let profile = ConnectionProfile::new(kind, "localhost")
                .with_credentials("admin", "secret");
            let client = create_client(&profile).unwrap();
            assert_eq!(client.kind(), expected);
        }
    }
}
