//! The deletion run state machine.
//!
//! One orchestrator instance serves the whole process; each call to
//! [`DeletionOrchestrator::run`] is an independent run serialized per
//! connection identity. A run never returns `Err`: every failure mode
//! collapses into a [`DeletionResult`] carrying the partial progress made
//! before the failure.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use fwsweep_client::{create_client, FirewallClient};
use fwsweep_common::{
    retry_op, ConnectionLocks, DeletionDetails, DeletionPlan, DeletionRequest, DeletionResult,
    FirewallError, FirewallResult, RetryPolicy,
};

use crate::resolver::ReferenceResolver;

/// Run lifecycle states, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Request accepted, nothing done yet.
    Initiated,
    /// Establishing the management-plane session.
    Authenticating,
    /// Walking references and computing the plan.
    Resolving,
    /// Plan computed, not yet applied.
    Planned,
    /// Applying plan steps in order.
    Applying,
    /// Publishing applied changes.
    Committing,
    /// Run finished without publishing (auto-commit off).
    SkipCommit,
    /// Every step succeeded.
    Complete,
    /// The run aborted; partial progress is in the result.
    Failed,
}

impl RunState {
    /// Returns the state name as logged.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Initiated => "INITIATED",
            RunState::Authenticating => "AUTHENTICATING",
            RunState::Resolving => "RESOLVING",
            RunState::Planned => "PLANNED",
            RunState::Applying => "APPLYING",
            RunState::Committing => "COMMITTING",
            RunState::SkipCommit => "SKIP_COMMIT",
            RunState::Complete => "COMPLETE",
            RunState::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchConfig {
    /// Overall budget for one run, authenticate through commit.
    pub timeout: Duration,
    /// Retry policy for individual client calls.
    pub retry: RetryPolicy,
    /// Optional bound on the containment walk depth.
    pub max_depth: Option<usize>,
}

impl Default for OrchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::default(),
            max_depth: None,
        }
    }
}

/// Drives one deletion request from authentication through commit.
pub struct DeletionOrchestrator {
    config: OrchConfig,
    locks: Arc<ConnectionLocks>,
}

impl DeletionOrchestrator {
    /// Creates an orchestrator sharing the given lock registry. All
    /// orchestrators in a process must share one registry, or per-connection
    /// serialization breaks down.
    pub fn new(config: OrchConfig, locks: Arc<ConnectionLocks>) -> Self {
        Self { config, locks }
    }

    /// Runs one deletion end to end. Infallible by contract: failures are
    /// reported through the result, partial progress included.
    pub async fn run(&self, request: &DeletionRequest) -> DeletionResult {
        match create_client(&request.profile()) {
            Ok(client) => self.run_with_client(request, client).await,
            Err(err) => {
                let mut details = DeletionDetails::default();
                details.record_error(err.to_string());
                DeletionResult::failed(
                    format!(
                        "Failed to delete IP object {}: {err}",
                        request.ip_object_id
                    ),
                    details,
                )
            }
        }
    }

    /// Runs one deletion against a caller-supplied client. Tests use this
    /// seam to inject a client over shared fixture state.
    #[instrument(
        skip_all,
        fields(
            run_id = %Uuid::new_v4(),
            firewall = %request.firewall_type,
            object = %request.ip_object_id,
        )
    )]
    pub async fn run_with_client(
        &self,
        request: &DeletionRequest,
        mut client: Box<dyn FirewallClient>,
    ) -> DeletionResult {
        let profile = request.profile();
        let _guard = self.locks.acquire(&profile.connection_key()).await;

        let mut details = DeletionDetails::default();
        let mut state = RunState::Initiated;
        info!(state = %state, host = %profile.host, "deletion run starting");

        let budget = self.config.timeout;
        let outcome = tokio::time::timeout(
            budget,
            self.execute(request, client.as_mut(), &mut details, &mut state),
        )
        .await;
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(_) => Some(FirewallError::timeout(budget)),
        };

        let result = match error {
            None => {
                self.transition(&mut state, RunState::Complete);
                info!("deletion run complete");
                DeletionResult::succeeded(&request.ip_object_id, details)
            }
            Some(err) => {
                self.transition(&mut state, RunState::Failed);
                warn!(error = %err, "deletion run failed");
                details.record_error(error_detail(&err, &request.ip_object_id));
                if let Err(discard_err) = client.discard().await {
                    warn!(error = %discard_err, "failed to discard staged changes");
                }
                DeletionResult::failed(
                    format!("Failed to delete IP object {}: {err}", request.ip_object_id),
                    details,
                )
            }
        };

        if let Err(err) = client.disconnect().await {
            warn!(error = %err, "disconnect failed");
        }
        result
    }

    async fn execute(
        &self,
        request: &DeletionRequest,
        client: &mut dyn FirewallClient,
        details: &mut DeletionDetails,
        state: &mut RunState,
    ) -> FirewallResult<()> {
        self.transition(state, RunState::Authenticating);
        retry_op!(self.config.retry, client.authenticate().await)?;

        self.transition(state, RunState::Resolving);
        let plan = ReferenceResolver::new(&*client, self.config.retry.clone())
            .with_max_depth(self.config.max_depth)
            .resolve(&request.ip_object_id)
            .await?;

        self.transition(state, RunState::Planned);
        info!(
            steps = plan.step_count(),
            groups_modified = plan.groups_to_modify.len(),
            groups_deleted = plan.groups_to_delete.len(),
            rules_modified = plan.rules_to_modify.len(),
            rules_deleted = plan.rules_to_delete.len(),
            "deletion plan computed"
        );

        self.transition(state, RunState::Applying);
        self.apply(client, &plan, details).await?;

        if request.auto_commit {
            self.transition(state, RunState::Committing);
            retry_op!(self.config.retry, client.commit().await)?;
        } else {
            self.transition(state, RunState::SkipCommit);
            info!("auto-commit disabled, leaving changes unpublished");
        }
        Ok(())
    }

    /// Applies the plan in dependency order: member removals first, then
    /// empty-group deletions, then rule updates, then rule deletions, and
    /// the object itself last. Each success is recorded before the next
    /// step runs, so an abort never loses progress.
    async fn apply(
        &self,
        client: &mut dyn FirewallClient,
        plan: &DeletionPlan,
        details: &mut DeletionDetails,
    ) -> FirewallResult<()> {
        let retry = &self.config.retry;

        for (group_id, members) in &plan.group_removals {
            for member_id in members {
                debug!(group_id, member_id, "removing group member");
                retry_op!(
                    retry,
                    client.remove_member_from_group(group_id, member_id).await
                )?;
                if plan.groups_to_modify.contains_key(group_id) {
                    details.record_group_modified(group_id.clone());
                }
            }
        }

        for group_id in &plan.groups_to_delete {
            debug!(group_id, "deleting emptied group");
            retry_op!(retry, client.delete_group(group_id).await)?;
            details.record_group_deleted(group_id.clone());
        }

        for (rule_id, fields) in &plan.rule_removals {
            for (field, refs) in fields {
                for ref_id in refs {
                    debug!(rule_id, %field, ref_id, "removing rule reference");
                    retry_op!(
                        retry,
                        client
                            .update_rule_remove_reference(rule_id, *field, ref_id)
                            .await
                    )?;
                    details.record_rule_modified(rule_id.clone());
                }
            }
        }

        for rule_id in &plan.rules_to_delete {
            debug!(rule_id, "deleting rule");
            retry_op!(retry, client.delete_rule(rule_id).await)?;
            details.record_rule_deleted(rule_id.clone());
        }

        debug!(object_id = %plan.object_id, "deleting target object");
        retry_op!(retry, client.delete_object(&plan.object_id).await)?;
        details.ip_object_deleted = true;
        Ok(())
    }

    fn transition(&self, state: &mut RunState, next: RunState) {
        debug!(from = %state, to = %next, "state transition");
        *state = next;
    }
}

/// Maps an error to its operator-facing detail string. A missing target
/// object gets the canonical short form callers match on.
fn error_detail(err: &FirewallError, target_id: &str) -> String {
    match err {
        FirewallError::NotFound { entity, id } if entity == "object" && id == target_id => {
            "object not found".to_string()
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    use fwsweep_client::{FixtureState, MemoryFirewall};
    use fwsweep_common::{ConnectionParams, FirewallKind};

    fn orchestrator() -> DeletionOrchestrator {
        DeletionOrchestrator::new(OrchConfig::default(), Arc::new(ConnectionLocks::new()))
    }

    fn request(object_id: &str) -> DeletionRequest {
        DeletionRequest {
            firewall_type: FirewallKind::Test,
            ip_object_id: object_id.to_string(),
            connection_params: ConnectionParams {
                host: "localhost".to_string(),
                port: 443,
                ..Default::default()
            },
            auto_commit: true,
        }
    }

    fn shared_client(
        request: &DeletionRequest,
        state: Arc<Mutex<FixtureState>>,
    ) -> Box<dyn FirewallClient> {
        Box::new(MemoryFirewall::with_state(request.profile(), state))
    }

    #[test]
    fn test_state_names() {
        assert_eq!(RunState::Initiated.as_str(), "INITIATED");
        assert_eq!(RunState::SkipCommit.to_string(), "SKIP_COMMIT");
        assert_eq!(RunState::Failed.as_str(), "FAILED");
    }

    #[test]
    fn test_config_default() {
        let config = OrchConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.retry.max_attempts, 3);
        assert!(config.max_depth.is_none());
    }

    #[tokio::test]
    async fn test_apply_order_satisfies_remote_preconditions() {
        let orch = orchestrator();
        let request = request("Server1");
        let state = Arc::new(Mutex::new(FixtureState::sample()));

        let result = orch
            .run_with_client(&request, shared_client(&request, Arc::clone(&state)))
            .await;
        assert!(result.success, "{}", result.message);

        // The fixture rejects out-of-order mutations (deleting populated
        // groups, deleting still-referenced objects), so a successful log
        // proves ordering. Member removals precede the group delete, rule
        // deletion precedes the object delete, commit comes last.
        let log = state.lock().unwrap().op_log.clone();
        assert_eq!(
            log,
            [
                "remove_member_from_group:AllServers/Server1",
                "remove_member_from_group:AllServers/WebServers",
                "remove_member_from_group:WebServers/Server1",
                "delete_group:WebServers",
                "delete_rule:AllowWebAccess",
                "delete_object:Server1",
                "commit:-",
                "disconnect:-",
            ]
        );
    }

    #[tokio::test]
    async fn test_failure_preserves_partial_progress_and_discards() {
        let orch = orchestrator();
        let request = request("Server1");
        let state = Arc::new(Mutex::new(FixtureState::sample()));
        state
            .lock()
            .unwrap()
            .fail_once("delete_rule", FirewallError::permission("read-only session"));

        let result = orch
            .run_with_client(&request, shared_client(&request, Arc::clone(&state)))
            .await;

        assert!(!result.success);
        assert!(!result.details.ip_object_deleted);
        assert_eq!(result.details.groups_modified, vec!["AllServers"]);
        assert_eq!(result.details.groups_deleted, vec!["WebServers"]);
        assert_eq!(
            result.details.errors,
            vec!["permission denied: read-only session"]
        );

        let log = state.lock().unwrap().op_log.clone();
        assert!(log.contains(&"discard:-".to_string()));
        assert_eq!(log.last().map(String::as_str), Some("disconnect:-"));
        assert!(!log.contains(&"commit:-".to_string()));
    }

    #[tokio::test]
    async fn test_transient_auth_failure_is_retried() {
        let orch = orchestrator();
        let request = request("TestServer");
        let state = Arc::new(Mutex::new(FixtureState::sample()));
        state
            .lock()
            .unwrap()
            .fail_once("authenticate", FirewallError::connection("reset by peer"));

        let result = orch
            .run_with_client(&request, shared_client(&request, Arc::clone(&state)))
            .await;
        assert!(result.success, "{}", result.message);
        assert!(result.details.errors.is_empty());
    }

    #[tokio::test]
    async fn test_logical_failure_is_not_retried() {
        let orch = DeletionOrchestrator::new(
            OrchConfig::default(),
            Arc::new(ConnectionLocks::new()),
        );
        let request = request("NoSuchObject");
        let state = Arc::new(Mutex::new(FixtureState::sample()));

        let result = orch
            .run_with_client(&request, shared_client(&request, Arc::clone(&state)))
            .await;
        assert!(!result.success);
        assert_eq!(result.details.errors, vec!["object not found"]);
        assert!(result.details.groups_modified.is_empty());
        assert!(result.details.groups_deleted.is_empty());
        assert!(result.details.rules_modified.is_empty());
        assert!(result.details.rules_deleted.is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_reports_applied_progress() {
        let orch = orchestrator();
        let request = request("TestServer");
        let state = Arc::new(Mutex::new(FixtureState::sample()));
        state
            .lock()
            .unwrap()
            .fail_once("commit", FirewallError::commit("validation failed"));

        let result = orch
            .run_with_client(&request, shared_client(&request, Arc::clone(&state)))
            .await;
        assert!(!result.success);
        // Everything before the publish had already been applied.
        assert!(result.details.ip_object_deleted);
        assert_eq!(result.details.rules_deleted, vec!["AllowTestAccess"]);
        assert_eq!(
            result.details.errors,
            vec!["commit failed: validation failed"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_reports_budget_and_disconnects() {
        let orch = DeletionOrchestrator::new(
            OrchConfig {
                timeout: Duration::from_millis(50),
                // Backoff longer than the budget keeps the run inside the
                // retry sleep when the budget expires.
                retry: RetryPolicy {
                    max_attempts: 3,
                    base_delay: Duration::from_secs(60),
                    max_delay: Duration::from_secs(60),
                },
                max_depth: None,
            },
            Arc::new(ConnectionLocks::new()),
        );
        let request = request("TestServer");
        let state = Arc::new(Mutex::new(FixtureState::sample()));
        state
            .lock()
            .unwrap()
            .fail_once("authenticate", FirewallError::connection("reset by peer"));

        let result = orch
            .run_with_client(&request, shared_client(&request, Arc::clone(&state)))
            .await;
        assert!(!result.success);
        // Sub-second budgets round up in the report, never down to zero.
        assert_eq!(result.details.errors, vec!["operation timed out after 1s"]);

        let log = state.lock().unwrap().op_log.clone();
        assert_eq!(log.last().map(String::as_str), Some("disconnect:-"));
    }
}
