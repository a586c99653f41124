//! The external task boundary: inbound request and outbound result.
//!
//! The external task executor (queue, CLI, whatever transport) hands the
//! orchestrator a [`DeletionRequest`] and receives a [`DeletionResult`].
//! The result is the only value that outlives a run.

use serde::{Deserialize, Serialize};

use crate::profile::{ConnectionProfile, FirewallKind};

/// Connection parameters as submitted by the external boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Management server hostname or IP.
    pub host: String,
    /// Management API port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Username (Check Point).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Password (Check Point) or API token (FortiGate).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Multi-domain server domain (Check Point).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Virtual domain partition (FortiGate).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vdom: Option<String>,
}

fn default_port() -> u16 {
    443
}

/// A request to delete one IP object and clean up its dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionRequest {
    /// Target platform.
    pub firewall_type: FirewallKind,
    /// Identifier of the object to delete.
    pub ip_object_id: String,
    /// How to reach the management plane.
    pub connection_params: ConnectionParams,
    /// Whether to publish the changes at the end of a successful run.
    #[serde(default = "default_auto_commit")]
    pub auto_commit: bool,
}

fn default_auto_commit() -> bool {
    true
}

impl DeletionRequest {
    /// Builds the immutable connection profile for this request.
    pub fn profile(&self) -> ConnectionProfile {
        let p = &self.connection_params;
        ConnectionProfile {
            kind: self.firewall_type,
            host: p.host.clone(),
            port: p.port,
            username: p.username.clone(),
            password: p.password.clone(),
            domain: p.domain.clone(),
            vdom: p.vdom.clone(),
            auto_commit: self.auto_commit,
            verify_tls: false,
        }
    }
}

/// Per-entity outcome detail of a deletion run.
///
/// The modified/deleted lists record every mutation the moment it is
/// applied, so a failure midway never loses partial progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionDetails {
    /// True only if the final delete of the object itself succeeded.
    pub ip_object_deleted: bool,
    /// Groups that had the object (or an emptied nested group) removed
    /// and survive.
    pub groups_modified: Vec<String>,
    /// Groups deleted because their membership became empty.
    pub groups_deleted: Vec<String>,
    /// Rules that had references removed and survive.
    pub rules_modified: Vec<String>,
    /// Rules deleted because an endpoint field would have become empty.
    pub rules_deleted: Vec<String>,
    /// Error messages, in occurrence order.
    pub errors: Vec<String>,
}

impl DeletionDetails {
    /// Records a surviving-group mutation (idempotent per group).
    pub fn record_group_modified(&mut self, group_id: impl Into<String>) {
        let group_id = group_id.into();
        if !self.groups_modified.contains(&group_id) {
            self.groups_modified.push(group_id);
        }
    }

    /// Records a group deletion.
    pub fn record_group_deleted(&mut self, group_id: impl Into<String>) {
        self.groups_deleted.push(group_id.into());
    }

    /// Records a surviving-rule mutation (idempotent per rule).
    pub fn record_rule_modified(&mut self, rule_id: impl Into<String>) {
        let rule_id = rule_id.into();
        if !self.rules_modified.contains(&rule_id) {
            self.rules_modified.push(rule_id);
        }
    }

    /// Records a rule deletion.
    pub fn record_rule_deleted(&mut self, rule_id: impl Into<String>) {
        self.rules_deleted.push(rule_id.into());
    }

    /// Records an error message.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }
}

/// The structured outcome of a deletion run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionResult {
    /// True if every step, commit included, succeeded.
    pub success: bool,
    /// Operator-facing summary.
    pub message: String,
    /// Per-entity breakdown, partial progress included.
    pub details: DeletionDetails,
}

impl DeletionResult {
    /// A successful result for the given object.
    pub fn succeeded(object_id: &str, details: DeletionDetails) -> Self {
        Self {
            success: true,
            message: format!("Successfully deleted IP object {object_id} and its dependencies"),
            details,
        }
    }

    /// A failed result carrying whatever progress was made.
    pub fn failed(message: impl Into<String>, details: DeletionDetails) -> Self {
        Self {
            success: false,
            message: message.into(),
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_request_deserializes_with_defaults() {
        let request: DeletionRequest = serde_json::from_str(
            r#"{
                "firewall_type": "test",
                "ip_object_id": "TestServer",
                "connection_params": { "host": "localhost" }
            }"#,
        )
        .unwrap();

        assert_eq!(request.firewall_type, FirewallKind::Test);
        assert_eq!(request.connection_params.port, 443);
        assert!(request.auto_commit);

        let profile = request.profile();
        assert_eq!(profile.host, "localhost");
        assert!(profile.auto_commit);
    }

    #[test]
    fn test_details_record_idempotent() {
        let mut details = DeletionDetails::default();
        details.record_group_modified("AllServers");
        details.record_group_modified("AllServers");
        details.record_rule_modified("AllowWeb");
        details.record_rule_modified("AllowWeb");

        assert_eq!(details.groups_modified, vec!["AllServers"]);
        assert_eq!(details.rules_modified, vec!["AllowWeb"]);
    }

    #[test]
    fn test_result_serializes_all_fields() {
        let mut details = DeletionDetails::default();
        details.ip_object_deleted = true;
        details.record_group_modified("AllServers");
        let result = DeletionResult::succeeded("TestServer", details);

        let value: serde_json::Value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["details"]["ip_object_deleted"], true);
        assert_eq!(value["details"]["groups_modified"][0], "AllServers");
        assert_eq!(value["details"]["rules_deleted"], serde_json::json!([]));
    }

    #[test]
    fn test_failed_result_keeps_progress() {
        let mut details = DeletionDetails::default();
        details.record_group_modified("AllServers");
        details.record_error("connection error: reset");
        let result = DeletionResult::failed("Failed to delete IP object", details);

        assert!(!result.success);
        assert_eq!(result.details.groups_modified, vec!["AllServers"]);
        assert_eq!(result.details.errors.len(), 1);
    }
}
