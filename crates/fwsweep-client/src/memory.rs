//! In-memory firewall used for development and orchestration tests.
//!
//! Backs the `test` platform in the client factory. The fixture graph lives
//! behind an `Arc<Mutex<..>>` so several clients can share one state, which
//! is how concurrency tests observe lost updates. Every mutation is appended
//! to an operation log so tests can assert ordering, and individual
//! operations can be primed to fail once for failure-path coverage.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use fwsweep_common::{
    ConnectionProfile, FirewallError, FirewallKind, FirewallResult, Group, IpObject, Rule,
    RuleField,
};

use crate::client::FirewallClient;

/// The mutable configuration graph behind a [`MemoryFirewall`].
#[derive(Debug, Default)]
pub struct FixtureState {
    /// IP objects by id.
    pub objects: BTreeMap<String, IpObject>,
    /// Groups by id.
    pub groups: BTreeMap<String, Group>,
    /// Rules by id.
    pub rules: BTreeMap<String, Rule>,
    /// Every mutation applied, in order, as "op name:arg" entries.
    pub op_log: Vec<String>,
    /// Operations primed to fail exactly once, keyed by op name.
    fail_once: BTreeMap<String, FirewallError>,
}

impl FixtureState {
    /// The standard fixture graph:
    ///
    /// - objects `Server1`, `Server2`, `TestServer` (hosts), `DevNetwork`
    ///   (network)
    /// - `WebServers` = {Server1}; `AllServers` = {Server1, Server2,
    ///   TestServer, WebServers} (nested)
    /// - `AllowWebAccess`: DevNetwork -> WebServers, allow
    /// - `AllowTestAccess`: TestServer -> DevNetwork, allow
    pub fn sample() -> Self {
        let mut state = Self::default();
        for (id, value, kind) in [
            ("Server1", "192.168.1.10", "host"),
            ("Server2", "192.168.1.11", "host"),
            ("TestServer", "192.168.2.50", "host"),
        ] {
            state.objects.insert(id.to_string(), IpObject::new(id, value, kind));
        }
        state.objects.insert(
            "DevNetwork".to_string(),
            IpObject::new("DevNetwork", "10.0.1.0/24", "network"),
        );
        state.insert_group(Group::new("WebServers", ["Server1"]));
        state.insert_group(Group::new(
            "AllServers",
            ["Server1", "Server2", "TestServer", "WebServers"],
        ));
        state.insert_rule(
            Rule::new("AllowWebAccess", ["DevNetwork"], ["WebServers"]).with_action("allow"),
        );
        state.insert_rule(
            Rule::new("AllowTestAccess", ["TestServer"], ["DevNetwork"]).with_action("allow"),
        );
        state
    }

    /// Adds a group to the fixture.
    pub fn insert_group(&mut self, group: Group) {
        self.groups.insert(group.id.clone(), group);
    }

    /// Adds a rule to the fixture.
    pub fn insert_rule(&mut self, rule: Rule) {
        self.rules.insert(rule.id.clone(), rule);
    }

    /// Primes `op` (a trait method name, e.g. "delete_group") to fail once
    /// with the given error. The failure is consumed on first use.
    pub fn fail_once(&mut self, op: impl Into<String>, err: FirewallError) {
        self.fail_once.insert(op.into(), err);
    }

    /// Returns true if any group or rule still references `id`.
    pub fn is_referenced(&self, id: &str) -> bool {
        self.groups.values().any(|g| g.contains(id))
            || self.rules.values().any(|r| r.references(id))
    }

    fn check_fail(&mut self, op: &str) -> FirewallResult<()> {
        match self.fail_once.remove(op) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn log(&mut self, op: &str, arg: &str) {
        self.op_log.push(format!("{op}:{arg}"));
    }
}

/// In-memory [`FirewallClient`] over a (possibly shared) [`FixtureState`].
pub struct MemoryFirewall {
    profile: ConnectionProfile,
    state: Arc<Mutex<FixtureState>>,
    connected: bool,
}

impl MemoryFirewall {
    /// Creates a client with the standard sample fixture.
    pub fn with_sample_data(profile: ConnectionProfile) -> Self {
        Self::with_state(profile, Arc::new(Mutex::new(FixtureState::sample())))
    }

    /// Creates a client over an externally owned state. Several clients
    /// sharing one state model several runs against one management plane.
    pub fn with_state(profile: ConnectionProfile, state: Arc<Mutex<FixtureState>>) -> Self {
        Self {
            profile,
            state,
            connected: false,
        }
    }

    /// Returns a handle to the underlying state for test assertions.
    pub fn state(&self) -> Arc<Mutex<FixtureState>> {
        Arc::clone(&self.state)
    }

    fn lock(&self) -> MutexGuard<'_, FixtureState> {
        // A poisoned fixture means a test already panicked; propagate it.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn ensure_connected(&self) -> FirewallResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(FirewallError::connection("not connected"))
        }
    }
}

#[async_trait]
impl FirewallClient for MemoryFirewall {
    fn kind(&self) -> FirewallKind {
        FirewallKind::Test
    }

    async fn authenticate(&mut self) -> FirewallResult<()> {
        self.lock().check_fail("authenticate")?;
        // "fail" as username simulates a credential/transport failure.
        if self.profile.username.as_deref() == Some("fail") {
            return Err(FirewallError::connection("simulated authentication failure"));
        }
        self.connected = true;
        debug!(host = %self.profile.host, "connected to in-memory firewall");
        Ok(())
    }

    async fn find_object(&self, id: &str) -> FirewallResult<IpObject> {
        self.ensure_connected()?;
        let mut state = self.lock();
        state.check_fail("find_object")?;
        state
            .objects
            .get(id)
            .cloned()
            .ok_or_else(|| FirewallError::object_not_found(id))
    }

    async fn find_groups_containing(&self, member_id: &str) -> FirewallResult<Vec<Group>> {
        self.ensure_connected()?;
        let mut state = self.lock();
        state.check_fail("find_groups_containing")?;
        Ok(state
            .groups
            .values()
            .filter(|g| g.contains(member_id))
            .cloned()
            .collect())
    }

    async fn find_rules_referencing(&self, ids: &BTreeSet<String>) -> FirewallResult<Vec<Rule>> {
        self.ensure_connected()?;
        let mut state = self.lock();
        state.check_fail("find_rules_referencing")?;
        Ok(state
            .rules
            .values()
            .filter(|r| ids.iter().any(|id| r.references(id)))
            .cloned()
            .collect())
    }

    async fn remove_member_from_group(
        &mut self,
        group_id: &str,
        member_id: &str,
    ) -> FirewallResult<()> {
        self.ensure_connected()?;
        let mut state = self.lock();
        state.check_fail("remove_member_from_group")?;
        let group = state
            .groups
            .get_mut(group_id)
            .ok_or_else(|| FirewallError::group_not_found(group_id))?;
        group.members.remove(member_id);
        state.log("remove_member_from_group", &format!("{group_id}/{member_id}"));
        Ok(())
    }

    async fn delete_group(&mut self, group_id: &str) -> FirewallResult<()> {
        self.ensure_connected()?;
        let mut state = self.lock();
        state.check_fail("delete_group")?;
        let group = state
            .groups
            .get(group_id)
            .ok_or_else(|| FirewallError::group_not_found(group_id))?;
        // Real platforms refuse to drop populated groups; enforce the same
        // precondition so ordering bugs surface in tests.
        if !group.is_empty() {
            return Err(FirewallError::unexpected(format!(
                "group {group_id} is not empty"
            )));
        }
        state.groups.remove(group_id);
        state.log("delete_group", group_id);
        Ok(())
    }

    async fn update_rule_remove_reference(
        &mut self,
        rule_id: &str,
        field: RuleField,
        ref_id: &str,
    ) -> FirewallResult<()> {
        self.ensure_connected()?;
        let mut state = self.lock();
        state.check_fail("update_rule_remove_reference")?;
        let rule = state
            .rules
            .get_mut(rule_id)
            .ok_or_else(|| FirewallError::rule_not_found(rule_id))?;
        rule.refs_mut(field).remove(ref_id);
        state.log(
            "update_rule_remove_reference",
            &format!("{rule_id}/{field}/{ref_id}"),
        );
        Ok(())
    }

    async fn delete_rule(&mut self, rule_id: &str) -> FirewallResult<()> {
        self.ensure_connected()?;
        let mut state = self.lock();
        state.check_fail("delete_rule")?;
        if state.rules.remove(rule_id).is_none() {
            return Err(FirewallError::rule_not_found(rule_id));
        }
        state.log("delete_rule", rule_id);
        Ok(())
    }

    async fn delete_object(&mut self, object_id: &str) -> FirewallResult<()> {
        self.ensure_connected()?;
        let mut state = self.lock();
        state.check_fail("delete_object")?;
        if !state.objects.contains_key(object_id) {
            return Err(FirewallError::object_not_found(object_id));
        }
        // A referenced object must have had its references cleaned up first.
        if state.is_referenced(object_id) {
            return Err(FirewallError::unexpected(format!(
                "object {object_id} is still referenced"
            )));
        }
        state.objects.remove(object_id);
        state.log("delete_object", object_id);
        Ok(())
    }

    async fn commit(&mut self) -> FirewallResult<()> {
        self.ensure_connected()?;
        let mut state = self.lock();
        state.check_fail("commit")?;
        state.log("commit", "-");
        Ok(())
    }

    async fn discard(&mut self) -> FirewallResult<()> {
        let mut state = self.lock();
        state.log("discard", "-");
        Ok(())
    }

    async fn disconnect(&mut self) -> FirewallResult<()> {
        self.connected = false;
        self.lock().log("disconnect", "-");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn connected_client() -> MemoryFirewall {
        let profile = ConnectionProfile::new(FirewallKind::Test, "localhost")
            .with_credentials("admin", "secret");
        let mut client = MemoryFirewall::with_sample_data(profile);
        client.connected = true;
        client
    }

    #[tokio::test]
    async fn test_requires_authentication() {
        let profile = ConnectionProfile::new(FirewallKind::Test, "localhost");
        let client = MemoryFirewall::with_sample_data(profile);
        assert!(matches!(
            client.find_object("Server1").await,
            Err(FirewallError::Connection { .. })
        ));
    }

    #[tokio::test]
    async fn test_fail_username_rejects_authentication() {
        let profile = ConnectionProfile::new(FirewallKind::Test, "localhost")
            .with_credentials("fail", "secret");
        let mut client = MemoryFirewall::with_sample_data(profile);
        let err = client.authenticate().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_sample_graph_lookups() {
        let client = connected_client();
        let object = client.find_object("TestServer").await.unwrap();
        assert_eq!(object.value, "192.168.2.50");

        let groups = client.find_groups_containing("Server1").await.unwrap();
        let names: Vec<&str> = groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(names, ["AllServers", "WebServers"]);

        // Nested: WebServers is itself a member of AllServers.
        let parents = client.find_groups_containing("WebServers").await.unwrap();
        assert_eq!(parents.len(), 1);
        assert_eq!(parents[0].id, "AllServers");

        let ids: BTreeSet<String> = ["DevNetwork".to_string()].into();
        let rules = client.find_rules_referencing(&ids).await.unwrap();
        assert_eq!(rules.len(), 2);
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let client = connected_client();
        let err = client.find_object("NoSuchObject").await.unwrap_err();
        assert!(err.is_not_found("object"));
    }

    #[tokio::test]
    async fn test_delete_group_requires_empty() {
        let mut client = connected_client();
        let err = client.delete_group("WebServers").await.unwrap_err();
        assert!(matches!(err, FirewallError::UnexpectedResponse { .. }));

        client
            .remove_member_from_group("WebServers", "Server1")
            .await
            .unwrap();
        client.delete_group("WebServers").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_object_requires_no_references() {
        let mut client = connected_client();
        let err = client.delete_object("Server1").await.unwrap_err();
        assert!(matches!(err, FirewallError::UnexpectedResponse { .. }));
    }

    #[tokio::test]
    async fn test_op_log_records_mutations() {
        let mut client = connected_client();
        client
            .remove_member_from_group("AllServers", "Server2")
            .await
            .unwrap();
        client
            .update_rule_remove_reference("AllowTestAccess", RuleField::Source, "TestServer")
            .await
            .unwrap();
        let state = client.state();
        let log = state.lock().unwrap().op_log.clone();
        assert_eq!(
            log,
            [
                "remove_member_from_group:AllServers/Server2",
                "update_rule_remove_reference:AllowTestAccess/source/TestServer",
            ]
        );
    }

    #[tokio::test]
    async fn test_fail_once_consumed() {
        let mut client = connected_client();
        client
            .state()
            .lock()
            .unwrap()
            .fail_once("commit", FirewallError::commit("validation failed"));
        assert!(client.commit().await.is_err());
        assert!(client.commit().await.is_ok());
    }

    #[tokio::test]
    async fn test_shared_state_is_visible_across_clients() {
        let profile = ConnectionProfile::new(FirewallKind::Test, "localhost");
        let state = Arc::new(Mutex::new(FixtureState::sample()));
        let mut a = MemoryFirewall::with_state(profile.clone(), Arc::clone(&state));
        let b = MemoryFirewall::with_state(profile, Arc::clone(&state));
        a.connected = true;
        let mut b = b;
        b.connected = true;

        a.remove_member_from_group("WebServers", "Server1")
            .await
            .unwrap();
        let groups = b.find_groups_containing("Server1").await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].id, "AllServers");
    }
}
