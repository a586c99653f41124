//! Connection profiles and firewall platform selection.

use serde::{Deserialize, Serialize};

use crate::error::FirewallError;

/// Supported firewall management platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirewallKind {
    /// Check Point Management API (session token, staged mutations,
    /// explicit publish).
    Checkpoint,
    /// FortiGate FortiOS REST API (token auth, vdom-scoped,
    /// immediate-apply mutations).
    Fortinet,
    /// Deterministic in-memory test target, no network I/O.
    Test,
}

impl FirewallKind {
    /// Returns the lowercase platform name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FirewallKind::Checkpoint => "checkpoint",
            FirewallKind::Fortinet => "fortinet",
            FirewallKind::Test => "test",
        }
    }

    /// Returns true if mutations are staged until an explicit commit.
    ///
    /// Immediate-apply platforms cannot roll back applied changes; this
    /// asymmetry is inherent to the vendor APIs.
    pub fn is_staged(&self) -> bool {
        matches!(self, FirewallKind::Checkpoint)
    }
}

impl std::str::FromStr for FirewallKind {
    type Err = FirewallError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "checkpoint" => Ok(FirewallKind::Checkpoint),
            "fortinet" => Ok(FirewallKind::Fortinet),
            "test" => Ok(FirewallKind::Test),
            other => Err(FirewallError::unexpected(format!(
                "unsupported firewall type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for FirewallKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to reach one firewall management plane.
///
/// Immutable once constructed; built per request by the caller and consumed
/// by the client factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    /// Target platform.
    pub kind: FirewallKind,
    /// Management server hostname or IP.
    pub host: String,
    /// Management API port.
    pub port: u16,
    /// Username (Check Point).
    pub username: Option<String>,
    /// Password (Check Point) or API token (FortiGate).
    pub password: Option<String>,
    /// Multi-domain server domain (Check Point).
    pub domain: Option<String>,
    /// Virtual domain partition (FortiGate).
    pub vdom: Option<String>,
    /// Whether to publish changes at the end of a successful run.
    pub auto_commit: bool,
    /// Whether to verify the management server TLS certificate.
    pub verify_tls: bool,
}

impl ConnectionProfile {
    /// Creates a profile with defaults (port 443, auto-commit on,
    /// TLS verification off — management planes commonly run self-signed).
    pub fn new(kind: FirewallKind, host: impl Into<String>) -> Self {
        Self {
            kind,
            host: host.into(),
            port: 443,
            username: None,
            password: None,
            domain: None,
            vdom: None,
            auto_commit: true,
            verify_tls: false,
        }
    }

    /// Sets the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Sets the Check Point domain.
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Sets the FortiGate vdom.
    pub fn with_vdom(mut self, vdom: impl Into<String>) -> Self {
        self.vdom = Some(vdom.into());
        self
    }

    /// Sets auto-commit.
    pub fn with_auto_commit(mut self, auto_commit: bool) -> Self {
        self.auto_commit = auto_commit;
        self
    }

    /// Returns the stable identity used to serialize runs against the same
    /// management plane.
    ///
    /// Two runs whose profiles share a connection key are mutually
    /// exclusive; runs against different keys proceed in parallel.
    pub fn connection_key(&self) -> String {
        let partition = self
            .domain
            .as_deref()
            .or(self.vdom.as_deref())
            .unwrap_or("-");
        format!("{}://{}:{}/{}", self.kind, self.host, self.port, partition)
    }
}
