//! Error taxonomy for remote firewall operations.
//!
//! Every client call returns [`FirewallResult`]; the orchestrator decides
//! what to do with a failure based on [`FirewallError::is_retryable`].
//! Only transport-level connection failures are retryable — logical errors
//! (missing objects, permission denials, malformed vendor payloads) abort
//! the current step immediately.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for firewall operations.
pub type FirewallResult<T> = Result<T, FirewallError>;

/// Errors that can occur while talking to a firewall management plane.
#[derive(Debug, Clone, Error)]
pub enum FirewallError {
    /// Network or authentication transport failure. Retryable.
    #[error("connection error: {message}")]
    Connection {
        /// Description of the transport failure.
        message: String,
    },

    /// A referenced entity does not exist on the remote system.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The entity kind ("object", "group", "rule").
        entity: String,
        /// The identifier that was looked up.
        id: String,
    },

    /// The authenticated session lacks rights for the operation.
    #[error("permission denied: {message}")]
    Permission {
        /// Description from the vendor API.
        message: String,
    },

    /// The vendor rejected or failed the publish/commit step.
    #[error("commit failed: {message}")]
    Commit {
        /// Description from the vendor API.
        message: String,
    },

    /// The overall run budget was exceeded.
    #[error("operation timed out after {budget_secs}s")]
    Timeout {
        /// The configured budget, rounded up to whole seconds.
        budget_secs: u64,
    },

    /// The vendor returned a payload we do not recognize, or a logical
    /// precondition was violated remotely (e.g. deleting a non-empty group).
    #[error("unexpected vendor response: {message}")]
    UnexpectedResponse {
        /// Description of the malformed payload or violated precondition.
        message: String,
    },
}

impl FirewallError {
    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a not-found error for an IP object.
    pub fn object_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "object".to_string(),
            id: id.into(),
        }
    }

    /// Creates a not-found error for a group.
    pub fn group_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "group".to_string(),
            id: id.into(),
        }
    }

    /// Creates a not-found error for a rule.
    pub fn rule_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: "rule".to_string(),
            id: id.into(),
        }
    }

    /// Creates a permission error.
    pub fn permission(message: impl Into<String>) -> Self {
        Self::Permission {
            message: message.into(),
        }
    }

    /// Creates a commit error.
    pub fn commit(message: impl Into<String>) -> Self {
        Self::Commit {
            message: message.into(),
        }
    }

    /// Creates a timeout error from the configured budget. Rounds up to
    /// whole seconds so a sub-second budget never reports as zero.
    pub fn timeout(budget: Duration) -> Self {
        Self::Timeout {
            budget_secs: budget.as_secs_f64().ceil() as u64,
        }
    }

    /// Creates an unexpected-response error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::UnexpectedResponse {
            message: message.into(),
        }
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FirewallError::Connection { .. })
    }

    /// Returns true if this is a not-found error for the given entity kind.
    pub fn is_not_found(&self, entity: &str) -> bool {
        matches!(self, FirewallError::NotFound { entity: e, .. } if e == entity)
    }
}
