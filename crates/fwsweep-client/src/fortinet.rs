//! FortiGate FortiOS REST API client.
//!
//! Token-authenticated and vdom-scoped. Every mutation takes effect the
//! moment the API accepts it: there is no staging and no rollback. A run
//! that fails partway leaves the earlier mutations applied, which the
//! orchestrator surfaces through partial-progress reporting.
//!
//! FortiOS has no where-used endpoint, so group and policy discovery scans
//! the address-group and policy tables.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use fwsweep_common::{
    ConnectionProfile, FirewallError, FirewallKind, FirewallResult, Group, IpObject, Rule,
    RuleField,
};

use crate::client::FirewallClient;

/// Per-request timeout for REST API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// FortiGate FortiOS REST API client.
pub struct FortinetFirewall {
    profile: ConnectionProfile,
    http: reqwest::Client,
    base_url: String,
    connected: bool,
}

impl FortinetFirewall {
    /// Creates an unauthenticated client for the given profile.
    ///
    /// The API token is carried in the profile's password field.
    pub fn new(profile: ConnectionProfile) -> FirewallResult<Self> {
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(!profile.verify_tls)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FirewallError::connection(format!("failed to build HTTP client: {e}")))?;
        let base_url = format!("https://{}:{}/api/v2", profile.host, profile.port);
        Ok(Self {
            profile,
            http,
            base_url,
            connected: false,
        })
    }

    fn token(&self) -> FirewallResult<&str> {
        self.profile
            .password
            .as_deref()
            .ok_or_else(|| FirewallError::connection("API token is required for FortiGate"))
    }

    fn url(&self, path: &str) -> String {
        match &self.profile.vdom {
            Some(vdom) => format!("{}/{}?vdom={}", self.base_url, path, vdom),
            None => format!("{}/{}", self.base_url, path),
        }
    }

    fn ensure_connected(&self) -> FirewallResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(FirewallError::connection("not connected to FortiGate"))
        }
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
        subject: Option<(&str, &str)>,
    ) -> FirewallResult<Value> {
        let mut request = self
            .http
            .request(method.clone(), self.url(path))
            .bearer_auth(self.token()?);
        if let Some(body) = body {
            request = request.json(&body);
        }

        debug!(%method, path, "fortigate api call");
        let response = request
            .send()
            .await
            .map_err(|e| FirewallError::connection(format!("{path}: {e}")))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| FirewallError::connection(format!("{path}: {e}")))?;

        if status.is_success() {
            if text.is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| {
                FirewallError::unexpected(format!("{path}: invalid JSON body: {e}"))
            });
        }
        Err(classify_failure(path, status.as_u16(), subject))
    }

    async fn get(&self, path: &str, subject: Option<(&str, &str)>) -> FirewallResult<Value> {
        self.ensure_connected()?;
        self.request(reqwest::Method::GET, path, None, subject).await
    }

    async fn put(
        &self,
        path: &str,
        body: Value,
        subject: Option<(&str, &str)>,
    ) -> FirewallResult<Value> {
        self.ensure_connected()?;
        self.request(reqwest::Method::PUT, path, Some(body), subject)
            .await
    }

    async fn delete(&self, path: &str, subject: Option<(&str, &str)>) -> FirewallResult<Value> {
        self.ensure_connected()?;
        self.request(reqwest::Method::DELETE, path, None, subject)
            .await
    }

    /// Fetches the single table entry named by `mkey`.
    async fn fetch_entry(
        &self,
        table: &str,
        mkey: &str,
        entity: &str,
    ) -> FirewallResult<Value> {
        let body = self
            .get(&format!("cmdb/firewall/{table}/{mkey}"), Some((entity, mkey)))
            .await?;
        body["results"]
            .as_array()
            .and_then(|results| results.first().cloned())
            .ok_or_else(|| FirewallError::unexpected(format!("{table}/{mkey}: empty results")))
    }

    /// Fetches every entry of a table (vdom-scoped scan).
    async fn fetch_table(&self, table: &str) -> FirewallResult<Vec<Value>> {
        let body = self.get(&format!("cmdb/firewall/{table}"), None).await?;
        body["results"]
            .as_array()
            .cloned()
            .ok_or_else(|| FirewallError::unexpected(format!("{table}: missing results array")))
    }
}

#[async_trait]
impl FirewallClient for FortinetFirewall {
    fn kind(&self) -> FirewallKind {
        FirewallKind::Fortinet
    }

    async fn authenticate(&mut self) -> FirewallResult<()> {
        self.token()?;
        // Token auth has no login exchange; probe with a status read.
        let result = self
            .request(reqwest::Method::GET, "cmdb/system/status", None, None)
            .await;
        match result {
            Ok(_) => {
                self.connected = true;
                info!(host = %self.profile.host, "connected to FortiGate");
                Ok(())
            }
            Err(FirewallError::Permission { message }) => Err(FirewallError::connection(format!(
                "authentication rejected: {message}"
            ))),
            Err(err) => Err(err),
        }
    }

    async fn find_object(&self, id: &str) -> FirewallResult<IpObject> {
        let entry = self.fetch_entry("address", id, "object").await?;
        parse_address(&entry)
    }

    async fn find_groups_containing(&self, member_id: &str) -> FirewallResult<Vec<Group>> {
        let mut groups = Vec::new();
        for entry in self.fetch_table("addrgrp").await? {
            let group = parse_addrgrp(&entry)?;
            if group.contains(member_id) {
                groups.push(group);
            }
        }
        Ok(groups)
    }

    async fn find_rules_referencing(&self, ids: &BTreeSet<String>) -> FirewallResult<Vec<Rule>> {
        let mut rules = Vec::new();
        for entry in self.fetch_table("policy").await? {
            let rule = parse_policy(&entry)?;
            if ids.iter().any(|id| rule.references(id)) {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    async fn remove_member_from_group(
        &mut self,
        group_id: &str,
        member_id: &str,
    ) -> FirewallResult<()> {
        let entry = self.fetch_entry("addrgrp", group_id, "group").await?;
        let group = parse_addrgrp(&entry)?;
        if !group.contains(member_id) {
            debug!(group_id, member_id, "member already absent");
            return Ok(());
        }
        let remaining: Vec<Value> = group
            .members
            .iter()
            .filter(|m| m.as_str() != member_id)
            .map(|m| json!({ "name": m }))
            .collect();
        if remaining.is_empty() {
            // FortiOS rejects empty address groups; the final member stays
            // until delete_group removes the group outright.
            debug!(group_id, "deferring removal of final member to group deletion");
            return Ok(());
        }
        debug!(group_id, member_id, "removing member from group");
        self.put(
            &format!("cmdb/firewall/addrgrp/{group_id}"),
            json!({ "member": remaining }),
            Some(("group", group_id)),
        )
        .await?;
        Ok(())
    }

    async fn delete_group(&mut self, group_id: &str) -> FirewallResult<()> {
        debug!(group_id, "deleting group");
        self.delete(
            &format!("cmdb/firewall/addrgrp/{group_id}"),
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
        let entry = self.fetch_entry("policy", rule_id, "rule").await?;
        let rule = parse_policy(&entry)?;
        let remaining: Vec<Value> = rule
            .refs(field)
            .iter()
            .filter(|r| r.as_str() != ref_id)
            .map(|r| json!({ "name": r }))
            .collect();
        let payload_field = match field {
            RuleField::Source => "srcaddr",
            RuleField::Destination => "dstaddr",
        };
        debug!(rule_id, %field, ref_id, "removing rule reference");
        let mut payload = json!({});
        payload[payload_field] = Value::Array(remaining);
        self.put(
            &format!("cmdb/firewall/policy/{rule_id}"),
            payload,
            Some(("rule", rule_id)),
        )
        .await?;
        Ok(())
    }

    async fn delete_rule(&mut self, rule_id: &str) -> FirewallResult<()> {
        debug!(rule_id, "deleting policy");
        self.delete(
            &format!("cmdb/firewall/policy/{rule_id}"),
            Some(("rule", rule_id)),
        )
        .await?;
        Ok(())
    }

    async fn delete_object(&mut self, object_id: &str) -> FirewallResult<()> {
        debug!(object_id, "deleting address object");
        self.delete(
            &format!("cmdb/firewall/address/{object_id}"),
            Some(("object", object_id)),
        )
        .await?;
        Ok(())
    }

    async fn commit(&mut self) -> FirewallResult<()> {
        // Immediate-apply platform: every mutation is already live.
        debug!("commit is a no-op on FortiGate");
        Ok(())
    }

    async fn discard(&mut self) -> FirewallResult<()> {
        warn!("FortiGate applies changes immediately; already-applied changes cannot be rolled back");
        Ok(())
    }

    async fn disconnect(&mut self) -> FirewallResult<()> {
        // Token sessions have no logout exchange; just drop the session.
        self.connected = false;
        info!("disconnected from FortiGate");
        Ok(())
    }
}

/// Maps a non-2xx REST response onto the error taxonomy.
fn classify_failure(path: &str, status: u16, subject: Option<(&str, &str)>) -> FirewallError {
    match status {
        404 => match subject {
            Some((entity, id)) => FirewallError::NotFound {
                entity: entity.to_string(),
                id: id.to_string(),
            },
            None => FirewallError::unexpected(format!("{path}: 404")),
        },
        401 | 403 => FirewallError::permission(format!("{path}: HTTP {status}")),
        500..=599 => FirewallError::connection(format!("{path}: HTTP {status}")),
        _ => FirewallError::unexpected(format!("{path}: HTTP {status}")),
    }
}

fn parse_address(entry: &Value) -> FirewallResult<IpObject> {
    let id = entry["name"]
        .as_str()
        .ok_or_else(|| FirewallError::unexpected("address payload missing name"))?;
    let addr_type = entry["type"].as_str().unwrap_or("ipmask");
    let (value, kind) = match addr_type {
        "ipmask" => {
            let subnet = entry["subnet"]
                .as_str()
                .ok_or_else(|| FirewallError::unexpected(format!("address {id} missing subnet")))?;
            // "a.b.c.d 255.255.255.255" is a host, anything else a network.
            let kind = if subnet.ends_with("255.255.255.255") {
                "host"
            } else {
                "network"
            };
            (subnet.to_string(), kind.to_string())
        }
        "iprange" => {
            let start = entry["start-ip"].as_str().unwrap_or("");
            let end = entry["end-ip"].as_str().unwrap_or("");
            (format!("{start}-{end}"), "range".to_string())
        }
        other => (
            entry["subnet"].as_str().unwrap_or("").to_string(),
            other.to_string(),
        ),
    };
    let mut object = IpObject::new(id, value, kind);
    if let Some(comment) = entry["comment"].as_str() {
        if !comment.is_empty() {
            object = object.with_description(comment);
        }
    }
    Ok(object)
}

fn parse_addrgrp(entry: &Value) -> FirewallResult<Group> {
    let id = entry["name"]
        .as_str()
        .ok_or_else(|| FirewallError::unexpected("addrgrp payload missing name"))?;
    Ok(Group::new(id, ref_names(&entry["member"])))
}

fn parse_policy(entry: &Value) -> FirewallResult<Rule> {
    let id = match &entry["policyid"] {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => return Err(FirewallError::unexpected("policy payload missing policyid")),
    };
    let mut rule = Rule::new(
        id.clone(),
        ref_names(&entry["srcaddr"]),
        ref_names(&entry["dstaddr"]),
    );
    if let Some(name) = entry["name"].as_str() {
        if !name.is_empty() {
            rule.name = name.to_string();
        }
    }
    if let Some(action) = entry["action"].as_str() {
        rule = rule.with_action(action);
    }
    rule.enabled = entry["status"].as_str() != Some("disable");
    Ok(rule)
}

fn ref_names(value: &Value) -> BTreeSet<String> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|entry| entry["name"].as_str().map(str::to_string))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_url_carries_vdom() {
        let profile = ConnectionProfile::new(FirewallKind::Fortinet, "fw1")
            .with_credentials("", "token")
            .with_vdom("root");
        let client = FortinetFirewall::new(profile).unwrap();
        assert_eq!(
            client.url("cmdb/firewall/address/Server1"),
            "https://fw1:443/api/v2/cmdb/firewall/address/Server1?vdom=root"
        );

        let profile = ConnectionProfile::new(FirewallKind::Fortinet, "fw1")
            .with_credentials("", "token");
        let client = FortinetFirewall::new(profile).unwrap();
        assert_eq!(
            client.url("cmdb/system/status"),
            "https://fw1:443/api/v2/cmdb/system/status"
        );
    }

    #[test]
    fn test_missing_token_is_connection_error() {
        let profile = ConnectionProfile::new(FirewallKind::Fortinet, "fw1");
        let client = FortinetFirewall::new(profile).unwrap();
        assert!(matches!(
            client.token(),
            Err(FirewallError::Connection { .. })
        ));
    }

    #[test]
    fn test_parse_host_and_network_addresses() {
        let host = json!({
            "name": "Server1",
            "type": "ipmask",
            "subnet": "192.168.1.10 255.255.255.255"
        });
        let object = parse_address(&host).unwrap();
        assert_eq!(object.kind, "host");

        let network = json!({
            "name": "DevNetwork",
            "type": "ipmask",
            "subnet": "10.0.1.0 255.255.255.0",
            "comment": "Development network"
        });
        let object = parse_address(&network).unwrap();
        assert_eq!(object.kind, "network");
        assert_eq!(object.description.as_deref(), Some("Development network"));
    }

    #[test]
    fn test_parse_range_address() {
        let range = json!({
            "name": "Pool",
            "type": "iprange",
            "start-ip": "10.0.0.10",
            "end-ip": "10.0.0.20"
        });
        let object = parse_address(&range).unwrap();
        assert_eq!(object.kind, "range");
        assert_eq!(object.value, "10.0.0.10-10.0.0.20");
    }

    #[test]
    fn test_parse_policy() {
        let entry = json!({
            "policyid": 7,
            "name": "AllowWeb",
            "srcaddr": [ { "name": "DevNetwork" } ],
            "dstaddr": [ { "name": "WebServers" } ],
            "action": "accept",
            "status": "enable"
        });
        let rule = parse_policy(&entry).unwrap();
        assert_eq!(rule.id, "7");
        assert_eq!(rule.name, "AllowWeb");
        assert!(rule.references("WebServers"));
        assert!(rule.enabled);
    }

    #[test]
    fn test_classify_failure() {
        assert!(classify_failure("cmdb/firewall/address/x", 404, Some(("object", "x")))
            .is_not_found("object"));
        assert!(matches!(
            classify_failure("cmdb/system/status", 401, None),
            FirewallError::Permission { .. }
        ));
        assert!(classify_failure("cmdb/firewall/policy", 503, None).is_retryable());
    }
}
