//! Per-run deletion plan.
//!
//! The plan is computed fresh for every run from live remote state and is
//! discarded once applied; nothing in it is cached across runs. All
//! collections are ordered so that apply order and test output are
//! deterministic.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::RuleField;

/// The set of mutations required to delete one IP object while keeping the
/// remote configuration valid at every step.
///
/// Invariants:
/// - a group appears in `groups_to_delete` only if removing the staged
///   members empties it; `group_removals` covers deleted groups too, so
///   membership is emptied before the delete call;
/// - `groups_to_modify` and `groups_to_delete` are disjoint, as are
///   `rules_to_modify` and `rules_to_delete`;
/// - a rule whose affected field would become empty is staged for deletion
///   only — deletion dominates modification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionPlan {
    /// The object being deleted.
    pub object_id: String,
    /// Member removals per touched group (modified and deleted alike).
    pub group_removals: BTreeMap<String, BTreeSet<String>>,
    /// Groups that survive with the given remaining membership.
    pub groups_to_modify: BTreeMap<String, BTreeSet<String>>,
    /// Groups whose membership becomes empty and which are deleted.
    pub groups_to_delete: BTreeSet<String>,
    /// Reference removals per rule and field, for rules that survive.
    pub rule_removals: BTreeMap<String, BTreeMap<RuleField, BTreeSet<String>>>,
    /// Surviving rules with the remaining refs of each changed field.
    pub rules_to_modify: BTreeMap<String, BTreeMap<RuleField, BTreeSet<String>>>,
    /// Rules that would be left with an empty endpoint field and are deleted.
    pub rules_to_delete: BTreeSet<String>,
}

impl DeletionPlan {
    /// Creates an empty plan for the given object.
    pub fn new(object_id: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            ..Default::default()
        }
    }

    /// Stages a surviving group: `removals` are taken out, `remaining` stays.
    pub fn stage_group_modify(
        &mut self,
        group_id: impl Into<String>,
        removals: BTreeSet<String>,
        remaining: BTreeSet<String>,
    ) {
        let group_id = group_id.into();
        self.group_removals.insert(group_id.clone(), removals);
        self.groups_to_modify.insert(group_id, remaining);
    }

    /// Stages a group for deletion; `removals` must be its entire membership.
    pub fn stage_group_delete(&mut self, group_id: impl Into<String>, removals: BTreeSet<String>) {
        let group_id = group_id.into();
        self.groups_to_modify.remove(&group_id);
        self.group_removals.insert(group_id.clone(), removals);
        self.groups_to_delete.insert(group_id);
    }

    /// Stages a surviving rule field change.
    pub fn stage_rule_modify(
        &mut self,
        rule_id: impl Into<String>,
        field: RuleField,
        removals: BTreeSet<String>,
        remaining: BTreeSet<String>,
    ) {
        let rule_id = rule_id.into();
        self.rule_removals
            .entry(rule_id.clone())
            .or_default()
            .insert(field, removals);
        self.rules_to_modify
            .entry(rule_id)
            .or_default()
            .insert(field, remaining);
    }

    /// Stages a rule for deletion. Deletion dominates: any modification
    /// staged for the same rule is dropped.
    pub fn stage_rule_delete(&mut self, rule_id: impl Into<String>) {
        let rule_id = rule_id.into();
        self.rule_removals.remove(&rule_id);
        self.rules_to_modify.remove(&rule_id);
        self.rules_to_delete.insert(rule_id);
    }

    /// Returns true if the plan contains no dependency mutations —
    /// applying it only deletes the object itself.
    pub fn is_empty(&self) -> bool {
        self.group_removals.is_empty()
            && self.groups_to_delete.is_empty()
            && self.rule_removals.is_empty()
            && self.rules_to_delete.is_empty()
    }

    /// Total number of mutation steps, object deletion included.
    pub fn step_count(&self) -> usize {
        let member_removals: usize = self.group_removals.values().map(|m| m.len()).sum();
        let ref_removals: usize = self
            .rule_removals
            .values()
            .flat_map(|fields| fields.values())
            .map(|r| r.len())
            .sum();
        member_removals
            + self.groups_to_delete.len()
            + ref_removals
            + self.rules_to_delete.len()
            + 1
    }
}
