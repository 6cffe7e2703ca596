//! Domain types for the VoidNet registry store.
//!
//! Stored rows (`SatelliteRecord`, `Capsule`, `Deployment`, `AdminCredential`)
//! are JSON-serialized into redb tables. Read paths hand out views that never
//! carry a credential; only [`DispatchTarget`] exposes a satellite key, and it
//! exists solely to address the satellite's agent.

use serde::{Deserialize, Serialize};

/// Store-assigned satellite identifier.
pub type SatelliteId = u64;

/// Store-assigned capsule identifier.
pub type CapsuleId = u64;

/// Store-assigned deployment record identifier.
pub type DeploymentId = u64;

/// Branch used when a capsule does not name one.
pub const DEFAULT_BRANCH: &str = "main";

/// Satellite status assigned at registration.
pub const SATELLITE_ONLINE: &str = "online";

// ── Satellite ─────────────────────────────────────────────────────

/// Persisted satellite row, including its agent key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SatelliteRecord {
    pub id: SatelliteId,
    pub name: String,
    pub ip_address: String,
    pub hostname: String,
    /// Issued once at registration; never returned by read paths.
    pub api_key: String,
    /// `online`, `offline`, or whatever the satellite last reported.
    pub status: String,
    /// Unix timestamp of the last heartbeat, if any.
    pub last_heartbeat: Option<u64>,
    pub created_at: u64,
    /// Declared capability tags, in registration order.
    pub capabilities: Vec<String>,
}

/// Credential-free satellite view.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Satellite {
    pub id: SatelliteId,
    pub name: String,
    pub ip_address: String,
    pub hostname: String,
    pub status: String,
    pub last_heartbeat: Option<u64>,
    pub created_at: u64,
    pub capabilities: Vec<String>,
}

impl From<SatelliteRecord> for Satellite {
    fn from(record: SatelliteRecord) -> Self {
        Self {
            id: record.id,
            name: record.name,
            ip_address: record.ip_address,
            hostname: record.hostname,
            status: record.status,
            last_heartbeat: record.last_heartbeat,
            created_at: record.created_at,
            capabilities: record.capabilities,
        }
    }
}

/// Registration input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewSatellite {
    pub name: String,
    pub ip_address: String,
    pub hostname: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Result of a successful registration. The only time a key leaves the store
/// outside of dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisteredSatellite {
    pub satellite_id: SatelliteId,
    pub api_key: String,
}

// ── Capsule ───────────────────────────────────────────────────────

/// Lifecycle status of a capsule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapsuleStatus {
    Stopped,
    Running,
    /// Reported while a deploy is in flight; never persisted.
    Deploying,
    /// Reported while a stop is in flight; never persisted.
    Stopping,
    /// Persisted only when the overseer is configured to surface failures.
    Failed,
}

impl CapsuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Running => "running",
            Self::Deploying => "deploying",
            Self::Stopping => "stopping",
            Self::Failed => "failed",
        }
    }
}

/// Persisted capsule row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capsule {
    pub id: CapsuleId,
    pub name: String,
    pub satellite_id: SatelliteId,
    pub git_url: String,
    pub git_branch: String,
    /// Last manifest known to pass validation: the creation snapshot until
    /// the first successful deploy, then the copy that was dispatched.
    pub compose_file: Option<String>,
    pub status: CapsuleStatus,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Capsule joined with its satellite's display fields.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapsuleView {
    #[serde(flatten)]
    pub capsule: Capsule,
    pub satellite_name: String,
    pub satellite_hostname: String,
    pub satellite_ip: String,
}

/// Capsule creation input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewCapsule {
    pub name: String,
    pub satellite_id: SatelliteId,
    pub git_url: String,
    #[serde(default = "default_branch")]
    pub git_branch: String,
    pub compose_file: String,
}

fn default_branch() -> String {
    DEFAULT_BRANCH.to_string()
}

/// Everything needed to dispatch work for one capsule to its satellite.
#[derive(Clone, PartialEq)]
pub struct DispatchTarget {
    pub capsule: Capsule,
    pub satellite_id: SatelliteId,
    pub satellite_name: String,
    pub address: String,
    pub api_key: String,
}

impl std::fmt::Debug for DispatchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchTarget")
            .field("capsule", &self.capsule.id)
            .field("satellite_id", &self.satellite_id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

// ── Deployment ────────────────────────────────────────────────────

/// What a deployment record attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentAction {
    Deploy,
    Stop,
}

/// Outcome recorded for an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Success,
    Failed,
}

/// Immutable audit record of one deploy or stop attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Deployment {
    pub id: DeploymentId,
    pub capsule_id: CapsuleId,
    pub action: DeploymentAction,
    pub status: DeploymentStatus,
    /// Agent response payload on success.
    pub output: Option<String>,
    /// Error text on failure.
    pub error: Option<String>,
    pub created_at: u64,
}

/// Result of an attempt, as handed to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentOutcome {
    Success(String),
    Failed(String),
}

/// Input to [`crate::StateStore::record_deployment`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentEntry {
    pub capsule_id: CapsuleId,
    pub action: DeploymentAction,
    pub outcome: DeploymentOutcome,
    /// Manifest that was dispatched. Becomes the capsule's last-known-good
    /// copy on a successful deploy.
    pub manifest: Option<String>,
    /// Status to persist on failure. `None` leaves the capsule untouched.
    pub failure_status: Option<CapsuleStatus>,
}

// ── Credential ────────────────────────────────────────────────────

/// Admin credential. Only the secret's digest is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AdminCredential {
    pub username: String,
    pub secret_sha256: String,
    pub created_at: u64,
}

/// Row counts for health reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RegistryCounts {
    pub satellite_count: u64,
    pub capsule_count: u64,
}
