//! Check Point Management API client.
//!
//! Session-token based, stage/commit semantics: `login` returns a session
//! id carried in the `X-chkp-sid` header, every mutation is staged against
//! that session, and nothing is live until `publish`. A failed run discards
//! the session's staged changes so no partial state survives.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use fwsweep_common::{
    ConnectionProfile, FirewallError, FirewallKind, FirewallResult, Group, IpObject, Rule,
    RuleField,
};

use crate::client::FirewallClient;

/// Per-request timeout for management API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Access layer the rulebase operations run against.
const DEFAULT_ACCESS_LAYER: &str = "Network";

/// Check Point Management API client.
pub struct CheckpointFirewall {
    profile: ConnectionProfile,
    http: reqwest::Client,
    base_url: String,
    access_layer: String,
    sid: Option<String>,
}

impl CheckpointFirewall {
    /// Creates an unauthenticated client for the given profile.
    pub fn new(profile: ConnectionProfile) -> FirewallResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!profile.verify_tls)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FirewallError::connection(format!("failed to build HTTP client: {e}")))?;
        let base_url = format!("https://{}:{}/web_api", profile.host, profile.port);
        Ok(Self {
            profile,
            http,
            base_url,
            access_layer: DEFAULT_ACCESS_LAYER.to_string(),
            sid: None,
        })
    }

    /// Overrides the access layer (defaults to "Network").
    pub fn with_access_layer(mut self, layer: impl Into<String>) -> Self {
        self.access_layer = layer.into();
        self
    }

    fn session_id(&self) -> FirewallResult<&str> {
        self.sid
            .as_deref()
            .ok_or_else(|| FirewallError::connection("not connected to management server"))
    }

    /// Issues one management API command.
    ///
    /// `subject` names the entity a vendor not-found code refers to.
    async fn call(
        &self,
        command: &str,
        payload: Value,
        subject: Option<(&str, &str)>,
    ) -> FirewallResult<Value> {
        let url = format!("{}/{}", self.base_url, command);
        let mut request = self.http.post(&url).json(&payload);
        if command != "login" {
            request = request.header("X-chkp-sid", self.session_id()?);
        }

        debug!(command, "checkpoint api call");
        let response = request
            .send()
            .await
            .map_err(|e| FirewallError::connection(format!("{command}: {e}")))?;
        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| FirewallError::unexpected(format!("{command}: invalid JSON body: {e}")))?;

        if status.is_success() {
            return Ok(body);
        }
        Err(classify_failure(command, status.as_u16(), &body, subject))
    }

    async fn show_group(&self, group_id: &str) -> FirewallResult<Group> {
        let body = self
            .call(
                "show-group",
                json!({ "name": group_id }),
                Some(("group", group_id)),
            )
            .await?;
        parse_group(&body)
    }

    async fn show_rule(&self, rule_id: &str) -> FirewallResult<Rule> {
        let body = self
            .call(
                "show-access-rule",
                json!({ "name": rule_id, "layer": self.access_layer }),
                Some(("rule", rule_id)),
            )
            .await?;
        parse_rule(&body)
    }

    /// Names of directly-referencing entities from a `where-used` response.
    async fn where_used(&self, id: &str) -> FirewallResult<Value> {
        self.call("where-used", json!({ "name": id }), Some(("object", id)))
            .await
    }
}

#[async_trait]
impl FirewallClient for CheckpointFirewall {
    fn kind(&self) -> FirewallKind {
        FirewallKind::Checkpoint
    }

    async fn authenticate(&mut self) -> FirewallResult<()> {
        // Omit unset fields entirely; the API rejects null credentials.
        let mut payload = json!({});
        if let Some(user) = &self.profile.username {
            payload["user"] = json!(user);
        }
        if let Some(password) = &self.profile.password {
            payload["password"] = json!(password);
        }
        if let Some(domain) = &self.profile.domain {
            payload["domain"] = json!(domain);
        }

        let body = match self.call("login", payload, None).await {
            Ok(body) => body,
            // Any login failure is a connection-level failure; there is no
            // anonymous fallback.
            Err(FirewallError::Connection { message }) => {
                return Err(FirewallError::connection(message))
            }
            Err(other) => {
                return Err(FirewallError::connection(format!("login failed: {other}")))
            }
        };

        match body["sid"].as_str() {
            Some(sid) => {
                self.sid = Some(sid.to_string());
                info!(host = %self.profile.host, "connected to Check Point management server");
                Ok(())
            }
            None => Err(FirewallError::connection(
                "login successful but no session id returned",
            )),
        }
    }

    async fn find_object(&self, id: &str) -> FirewallResult<IpObject> {
        // Address objects are hosts or networks; try both commands.
        match self
            .call("show-host", json!({ "name": id }), Some(("object", id)))
            .await
        {
            Ok(body) => parse_object(&body),
            Err(err) if err.is_not_found("object") => {
                let body = self
                    .call("show-network", json!({ "name": id }), Some(("object", id)))
                    .await?;
                parse_object(&body)
            }
            Err(err) => Err(err),
        }
    }

    async fn find_groups_containing(&self, member_id: &str) -> FirewallResult<Vec<Group>> {
        let body = self.where_used(member_id).await?;
        let mut groups = Vec::new();
        for entry in body["used-directly"]["objects"].as_array().into_iter().flatten() {
            if entry["type"].as_str() == Some("group") {
                if let Some(name) = entry["name"].as_str() {
                    groups.push(self.show_group(name).await?);
                }
            }
        }
        Ok(groups)
    }

    async fn find_rules_referencing(&self, ids: &BTreeSet<String>) -> FirewallResult<Vec<Rule>> {
        let mut rules: BTreeMap<String, Rule> = BTreeMap::new();
        for id in ids {
            let body = match self.where_used(id).await {
                Ok(body) => body,
                // A group already deleted between discovery passes simply
                // contributes no rules.
                Err(err) if err.is_not_found("object") => continue,
                Err(err) => return Err(err),
            };
            for entry in body["used-directly"]["access-control-rules"]
                .as_array()
                .into_iter()
                .flatten()
            {
                let Some(rule_name) = entry["rule"]["name"].as_str() else {
                    continue;
                };
                if !rules.contains_key(rule_name) {
                    let rule = self.show_rule(rule_name).await?;
                    rules.insert(rule_name.to_string(), rule);
                }
            }
        }
        Ok(rules.into_values().collect())
    }

    async fn remove_member_from_group(
        &mut self,
        group_id: &str,
        member_id: &str,
    ) -> FirewallResult<()> {
        debug!(group_id, member_id, "removing member from group");
        self.call(
            "set-group",
            json!({ "name": group_id, "members": { "remove": [member_id] } }),
            Some(("group", group_id)),
        )
        .await?;
        Ok(())
    }

    async fn delete_group(&mut self, group_id: &str) -> FirewallResult<()> {
        debug!(group_id, "deleting empty group");
        self.call(
            "delete-group",
            json!({ "name": group_id }),
            Some(("group", group_id)),
        )
        .await?;
        Ok(())
    }

    async fn update_rule_remove_reference(
        &mut self,
        rule_id: &str,
        field: RuleField,
        ref_id: &str,
    ) -> FirewallResult<()> {
        debug!(rule_id, %field, ref_id, "removing rule reference");
        let mut payload = json!({ "name": rule_id, "layer": self.access_layer });
        payload[field.as_str()] = json!({ "remove": [ref_id] });
        self.call("set-access-rule", payload, Some(("rule", rule_id)))
            .await?;
        Ok(())
    }

    async fn delete_rule(&mut self, rule_id: &str) -> FirewallResult<()> {
        debug!(rule_id, "deleting rule");
        self.call(
            "delete-access-rule",
            json!({ "name": rule_id, "layer": self.access_layer }),
            Some(("rule", rule_id)),
        )
        .await?;
        Ok(())
    }

    async fn delete_object(&mut self, object_id: &str) -> FirewallResult<()> {
        debug!(object_id, "deleting object");
        match self
            .call(
                "delete-host",
                json!({ "name": object_id }),
                Some(("object", object_id)),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found("object") => {
                self.call(
                    "delete-network",
                    json!({ "name": object_id }),
                    Some(("object", object_id)),
                )
                .await?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    async fn commit(&mut self) -> FirewallResult<()> {
        info!("publishing staged changes");
        if let Err(err) = self.call("publish", json!({}), None).await {
            // Leave no partial state behind a failed publish.
            if let Err(discard_err) = self.discard().await {
                warn!(error = %discard_err, "discard after failed publish also failed");
            }
            return Err(FirewallError::commit(err.to_string()));
        }
        Ok(())
    }

    async fn discard(&mut self) -> FirewallResult<()> {
        if self.sid.is_none() {
            return Ok(());
        }
        info!("discarding staged changes");
        self.call("discard", json!({}), None).await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> FirewallResult<()> {
        if self.sid.is_some() {
            if let Err(err) = self.call("logout", json!({}), None).await {
                warn!(error = %err, "logout failed");
            } else {
                info!("disconnected from Check Point management server");
            }
            self.sid = None;
        }
        Ok(())
    }
}

/// Maps a non-2xx management API response onto the error taxonomy.
fn classify_failure(
    command: &str,
    status: u16,
    body: &Value,
    subject: Option<(&str, &str)>,
) -> FirewallError {
    let code = body["code"].as_str().unwrap_or("");
    let message = body["message"].as_str().unwrap_or("no message");

    if code.contains("not_found") {
        if let Some((entity, id)) = subject {
            return FirewallError::NotFound {
                entity: entity.to_string(),
                id: id.to_string(),
            };
        }
    }
    match status {
        401 | 403 => FirewallError::permission(format!("{command}: {message}")),
        500..=599 => FirewallError::connection(format!("{command} ({status}): {message}")),
        _ => FirewallError::unexpected(format!("{command} failed ({code}): {message}")),
    }
}

fn parse_object(body: &Value) -> FirewallResult<IpObject> {
    let id = body["name"]
        .as_str()
        .ok_or_else(|| FirewallError::unexpected("object payload missing name"))?;
    let (value, kind) = if let Some(addr) = body["ipv4-address"].as_str() {
        (addr.to_string(), "host".to_string())
    } else if let Some(subnet) = body["subnet4"].as_str() {
        let mask = body["mask-length4"].as_u64().unwrap_or(32);
        (format!("{subnet}/{mask}"), "network".to_string())
    } else {
        return Err(FirewallError::unexpected(format!(
            "object {id} has no recognizable address payload"
        )));
    };
    let mut object = IpObject::new(id, value, kind);
    if let Some(comments) = body["comments"].as_str() {
        if !comments.is_empty() {
            object = object.with_description(comments);
        }
    }
    Ok(object)
}

fn parse_group(body: &Value) -> FirewallResult<Group> {
    let id = body["name"]
        .as_str()
        .ok_or_else(|| FirewallError::unexpected("group payload missing name"))?;
    let members = member_names(&body["members"]);
    Ok(Group::new(id, members))
}

fn parse_rule(body: &Value) -> FirewallResult<Rule> {
    let id = body["name"]
        .as_str()
        .or_else(|| body["uid"].as_str())
        .ok_or_else(|| FirewallError::unexpected("rule payload missing name and uid"))?;
    let mut rule = Rule::new(id, member_names(&body["source"]), member_names(&body["destination"]));
    if let Some(action) = body["action"]["name"].as_str() {
        rule = rule.with_action(action.to_ascii_lowercase());
    }
    rule.enabled = body["enabled"].as_bool().unwrap_or(true);
    Ok(rule)
}

/// Collects the `name` of each referenced object in a payload array.
fn member_names(value: &Value) -> BTreeSet<String> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            entry
                .as_str()
                .or_else(|| entry["name"].as_str())
                .map(str::to_string)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_host_object() {
        let body = json!({
            "name": "Server1",
            "type": "host",
            "ipv4-address": "192.168.1.10",
            "comments": "Production web server"
        });
        let object = parse_object(&body).unwrap();
        assert_eq!(object.id, "Server1");
        assert_eq!(object.value, "192.168.1.10");
        assert_eq!(object.kind, "host");
        assert_eq!(object.description.as_deref(), Some("Production web server"));
    }

    #[test]
    fn test_parse_network_object() {
        let body = json!({
            "name": "DevNetwork",
            "type": "network",
            "subnet4": "10.0.1.0",
            "mask-length4": 24
        });
        let object = parse_object(&body).unwrap();
        assert_eq!(object.value, "10.0.1.0/24");
        assert_eq!(object.kind, "network");
    }

    #[test]
    fn test_parse_object_rejects_unknown_shape() {
        assert!(parse_object(&json!({ "name": "x" })).is_err());
        assert!(parse_object(&json!({ "ipv4-address": "1.2.3.4" })).is_err());
    }

    #[test]
    fn test_parse_group_members() {
        let body = json!({
            "name": "AllServers",
            "members": [
                { "name": "Server1", "type": "host" },
                { "name": "WebServers", "type": "group" }
            ]
        });
        let group = parse_group(&body).unwrap();
        assert_eq!(group.id, "AllServers");
        assert!(group.contains("Server1"));
        assert!(group.contains("WebServers"));
    }

    #[test]
    fn test_parse_rule() {
        let body = json!({
            "name": "AllowWebAccess",
            "source": [ { "name": "DevNetwork" } ],
            "destination": [ { "name": "WebServers" } ],
            "action": { "name": "Accept" },
            "enabled": true
        });
        let rule = parse_rule(&body).unwrap();
        assert_eq!(rule.id, "AllowWebAccess");
        assert!(rule.references("DevNetwork"));
        assert_eq!(rule.action, "accept");
        assert!(rule.enabled);
    }

    #[test]
    fn test_classify_not_found() {
        let body = json!({ "code": "generic_err_object_not_found", "message": "no such object" });
        let err = classify_failure("show-host", 404, &body, Some(("object", "Ghost")));
        assert!(err.is_not_found("object"));
        assert_eq!(err.to_string(), "object not found: Ghost");
    }

    #[test]
    fn test_classify_permission_and_server_errors() {
        let body = json!({ "code": "err_forbidden", "message": "operation not permitted" });
        assert!(matches!(
            classify_failure("delete-host", 403, &body, None),
            FirewallError::Permission { .. }
        ));
        assert!(classify_failure("publish", 502, &body, None).is_retryable());
        assert!(matches!(
            classify_failure("set-group", 400, &body, None),
            FirewallError::UnexpectedResponse { .. }
        ));
    }

    #[test]
    fn test_unauthenticated_calls_need_session() {
        let profile = ConnectionProfile::new(FirewallKind::Checkpoint, "mgmt.example.net")
            .with_credentials("admin", "secret");
        let client = CheckpointFirewall::new(profile).unwrap();
        assert!(client.session_id().is_err());
    }
}
