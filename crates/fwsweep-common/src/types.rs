//! Remote configuration entities.
//!
//! These are in-memory snapshots of what a firewall management plane
//! reports; they exist only inside a run and are never persisted. Membership
//! and rule endpoints are sets — order is irrelevant and duplicates are
//! impossible by construction.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A named address entity (host, network, range) in a firewall configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpObject {
    /// Vendor-native name or unique identifier.
    pub id: String,
    /// Address value (IP or CIDR).
    pub value: String,
    /// Object kind as reported by the vendor ("host", "network", "range").
    pub kind: String,
    /// Optional free-text description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl IpObject {
    /// Creates a new IP object.
    pub fn new(id: impl Into<String>, value: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
            kind: kind.into(),
            description: None,
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A named set of objects (and possibly nested groups) usable as a rule endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Vendor-native identifier.
    pub id: String,
    /// Display name (often equal to `id`).
    pub name: String,
    /// Member identifiers; each may name an object or another group.
    pub members: BTreeSet<String>,
}

impl Group {
    /// Creates a group from an id and its members.
    pub fn new<I, S>(id: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if the group has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Returns true if `member_id` is a direct member.
    pub fn contains(&self, member_id: &str) -> bool {
        self.members.contains(member_id)
    }
}

/// The rule field a reference lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleField {
    /// The source endpoint set.
    Source,
    /// The destination endpoint set.
    Destination,
}

impl RuleField {
    /// Both fields, in apply order.
    pub const ALL: [RuleField; 2] = [RuleField::Source, RuleField::Destination];

    /// Returns the field name as used in vendor payloads and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleField::Source => "source",
            RuleField::Destination => "destination",
        }
    }
}

impl std::fmt::Display for RuleField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An access-control entry whose endpoints reference objects and/or groups.
///
/// No assumption is made that the vendor distinguishes object refs from
/// group refs; a ref may name either.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    /// Vendor-native identifier.
    pub id: String,
    /// Display name (often equal to `id`).
    pub name: String,
    /// Source endpoint references.
    pub source: BTreeSet<String>,
    /// Destination endpoint references.
    pub destination: BTreeSet<String>,
    /// Rule action ("allow", "deny"). Deny by default, for safety.
    pub action: String,
    /// Whether the rule is enabled.
    pub enabled: bool,
}

impl Rule {
    /// Creates an enabled rule with the given endpoints.
    pub fn new<I, J, S, T>(id: impl Into<String>, source: I, destination: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            source: source.into_iter().map(Into::into).collect(),
            destination: destination.into_iter().map(Into::into).collect(),
            action: "deny".to_string(),
            enabled: true,
        }
    }

    /// Sets the action.
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    /// Returns the reference set for the given field.
    pub fn refs(&self, field: RuleField) -> &BTreeSet<String> {
        match field {
            RuleField::Source => &self.source,
            RuleField::Destination => &self.destination,
        }
    }

    /// Returns a mutable reference set for the given field.
    pub fn refs_mut(&mut self, field: RuleField) -> &mut BTreeSet<String> {
        match field {
            RuleField::Source => &mut self.source,
            RuleField::Destination => &mut self.destination,
        }
    }

    /// Returns true if any endpoint field references `id`.
    pub fn references(&self, id: &str) -> bool {
        self.source.contains(id) || self.destination.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_membership() {
        let group = Group::new("AllServers", ["Server1", "Server2"]);
        assert!(group.contains("Server1"));
        assert!(!group.contains("Server3"));
        assert!(!group.is_empty());

        let empty = Group::new("Empty", Vec::<String>::new());
        assert!(empty.is_empty());
    }

    #[test]
    fn test_rule_refs() {
        let rule = Rule::new("AllowWeb", ["DevNetwork"], ["WebServers"]).with_action("allow");
        assert!(rule.references("DevNetwork"));
        assert!(rule.references("WebServers"));
        assert!(!rule.references("Server1"));
        assert_eq!(rule.refs(RuleField::Source).len(), 1);
        assert_eq!(rule.action, "allow");
        assert!(rule.enabled);
    }

    #[test]
    fn test_rule_field_names() {
        assert_eq!(RuleField::Source.as_str(), "source");
        assert_eq!(RuleField::Destination.to_string(), "destination");
    }

    #[test]
    fn test_member_set_deduplicates() {
        let group = Group::new("G", ["a", "a", "b"]);
        assert_eq!(group.members.len(), 2);
    }
}
