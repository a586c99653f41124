//! Reference resolution: from one object id to a complete deletion plan.
//!
//! The resolver only reads remote state. It walks the group containment
//! graph upward from the target object, decides which groups and rules the
//! deletion cascades into, and emits a [`DeletionPlan`] for the
//! orchestrator to apply. Nothing is mutated here.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use fwsweep_client::FirewallClient;
use fwsweep_common::{retry_op, DeletionPlan, FirewallResult, Group, RetryPolicy, Rule, RuleField};

/// Computes the deletion plan for one IP object against live remote state.
pub struct ReferenceResolver<'a> {
    client: &'a dyn FirewallClient,
    retry: RetryPolicy,
    max_depth: Option<usize>,
}

impl<'a> ReferenceResolver<'a> {
    /// Creates a resolver reading through the given client. Remote reads
    /// are retried under `retry` like every other client call.
    pub fn new(client: &'a dyn FirewallClient, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            max_depth: None,
        }
    }

    /// Bounds the upward containment walk. Unbounded by default; the
    /// visited set already guarantees termination on cyclic graphs.
    pub fn with_max_depth(mut self, max_depth: Option<usize>) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Resolves every group and rule the deletion of `object_id` touches.
    ///
    /// A missing target object is an error, not an idempotent success:
    /// the caller asked to delete something that does not exist, and that
    /// is worth reporting.
    pub async fn resolve(&self, object_id: &str) -> FirewallResult<DeletionPlan> {
        let object = retry_op!(self.retry, self.client.find_object(object_id).await)?;
        debug!(id = %object.id, kind = %object.kind, "resolved target object");

        let groups = self.discover_groups(object_id).await?;
        debug!(groups = groups.len(), "containment walk complete");

        let (mut plan, removal) = stage_groups(object_id, &groups);

        // One fetch covers the object and every discovered group; rules
        // that only reference surviving groups come back too but produce
        // no removals and drop out below.
        let mut query: BTreeSet<String> = groups.keys().cloned().collect();
        query.insert(object_id.to_string());
        let rules = retry_op!(self.retry, self.client.find_rules_referencing(&query).await)?;
        debug!(rules = rules.len(), "rule discovery complete");

        stage_rules(&mut plan, rules, &removal);
        Ok(plan)
    }

    /// Breadth-first upward walk of the containment graph: groups holding
    /// the object, then groups holding those groups, and so on. The
    /// visited map makes cyclic membership terminate.
    async fn discover_groups(&self, object_id: &str) -> FirewallResult<BTreeMap<String, Group>> {
        let mut discovered: BTreeMap<String, Group> = BTreeMap::new();
        let mut frontier = vec![object_id.to_string()];
        let mut depth = 0usize;

        while !frontier.is_empty() {
            if self.max_depth.is_some_and(|max| depth >= max) {
                warn!(depth, "containment walk depth bound reached");
                break;
            }
            let mut next = Vec::new();
            for id in &frontier {
                let parents =
                    retry_op!(self.retry, self.client.find_groups_containing(id).await)?;
                for group in parents {
                    if !discovered.contains_key(&group.id) {
                        next.push(group.id.clone());
                        discovered.insert(group.id.clone(), group);
                    }
                }
            }
            frontier = next;
            depth += 1;
        }
        Ok(discovered)
    }
}

/// Stages group mutations and returns the plan together with the removal
/// set: the object plus every group whose deletion cascades.
///
/// Deletions are computed by fixpoint. A group empties when its membership
/// minus the removal set is empty; each newly emptied group joins the
/// removal set and may empty its own parents in turn. Discovered ancestors
/// that lose no member (reachable only through a surviving group) are
/// dropped from the plan.
fn stage_groups(
    object_id: &str,
    groups: &BTreeMap<String, Group>,
) -> (DeletionPlan, BTreeSet<String>) {
    let mut removal: BTreeSet<String> = BTreeSet::from([object_id.to_string()]);
    let mut deleted: BTreeSet<String> = BTreeSet::new();

    loop {
        let mut changed = false;
        for (id, group) in groups {
            if deleted.contains(id) {
                continue;
            }
            let loses_member = group.members.intersection(&removal).next().is_some();
            let empties = group.members.difference(&removal).next().is_none();
            if loses_member && empties {
                deleted.insert(id.clone());
                removal.insert(id.clone());
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    let mut plan = DeletionPlan::new(object_id);
    for (id, group) in groups {
        let removals: BTreeSet<String> = group.members.intersection(&removal).cloned().collect();
        if removals.is_empty() {
            continue;
        }
        if deleted.contains(id) {
            plan.stage_group_delete(id.clone(), group.members.clone());
        } else {
            let remaining: BTreeSet<String> =
                group.members.difference(&removal).cloned().collect();
            plan.stage_group_modify(id.clone(), removals, remaining);
        }
    }
    (plan, removal)
}

/// Stages rule mutations. A rule whose source or destination would be
/// left empty is deleted outright; deletion dominates any field change
/// staged for the same rule.
fn stage_rules(plan: &mut DeletionPlan, rules: Vec<Rule>, removal: &BTreeSet<String>) {
    for rule in rules {
        let mut field_changes = Vec::new();
        let mut delete = false;
        for field in RuleField::ALL {
            let refs = rule.refs(field);
            let to_remove: BTreeSet<String> = refs.intersection(removal).cloned().collect();
            if to_remove.is_empty() {
                continue;
            }
            let remaining: BTreeSet<String> = refs.difference(removal).cloned().collect();
            if remaining.is_empty() {
                delete = true;
                break;
            }
            field_changes.push((field, to_remove, remaining));
        }
        if delete {
            plan.stage_rule_delete(rule.id);
        } else {
            for (field, to_remove, remaining) in field_changes {
                plan.stage_rule_modify(rule.id.clone(), field, to_remove, remaining);
            }
        }
    }
}
