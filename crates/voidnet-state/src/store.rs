//! StateStore — redb-backed registry for the VoidNet overseer.
//!
//! Provides typed operations over satellites, capsules, deployments and the
//! admin credential. Referential rules are enforced inside the write
//! transaction that performs the mutation: a capsule cannot be created for a
//! missing satellite, names are unique per entity, deleting a satellite
//! removes its capsules, and a deployment record is written together with the
//! capsule status it implies. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use redb::{
    Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, WriteTransaction,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use voidnet_guard::Validator;

use crate::credentials;
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const SATELLITE_SEQ: &str = "satellite";
const CAPSULE_SEQ: &str = "capsule";
const DEPLOYMENT_SEQ: &str = "deployment";

/// Thread-safe registry store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    validator: Validator,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            validator: Validator::new(),
        };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            validator: Validator::new(),
        };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Replace the validator used to gate capsule creation.
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// The validator gating capsule creation.
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(SATELLITES).map_err(map_err!(Table))?;
        txn.open_table(SATELLITE_NAMES).map_err(map_err!(Table))?;
        txn.open_table(CAPSULES).map_err(map_err!(Table))?;
        txn.open_table(CAPSULE_NAMES).map_err(map_err!(Table))?;
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(CREDENTIALS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Admin credential ───────────────────────────────────────────

    /// Create the admin credential if none exists.
    ///
    /// Returns the plaintext secret only when it was created by this call.
    /// The caller is responsible for showing it to the operator once; it
    /// cannot be recovered afterwards.
    pub fn ensure_admin_credential(&self, username: &str) -> StateResult<Option<String>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let secret = {
            let mut table = txn.open_table(CREDENTIALS).map_err(map_err!(Table))?;
            if table.len().map_err(map_err!(Read))? > 0 {
                None
            } else {
                let secret = credentials::generate_secret()?;
                let credential = AdminCredential {
                    username: username.to_string(),
                    secret_sha256: credentials::digest(&secret),
                    created_at: epoch_secs(),
                };
                let value = to_json(&credential)?;
                table
                    .insert(username, value.as_slice())
                    .map_err(map_err!(Write))?;
                Some(secret)
            }
        };
        txn.commit().map_err(map_err!(Transaction))?;
        if secret.is_some() {
            info!(%username, "admin credential created");
        }
        Ok(secret)
    }

    /// Check a presented secret against the stored admin credentials.
    pub fn verify_admin_secret(&self, secret: &str) -> StateResult<bool> {
        let presented = credentials::digest(secret);
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CREDENTIALS).map_err(map_err!(Table))?;
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let credential: AdminCredential = from_json(value.value())?;
            if credentials::digests_match(&credential.secret_sha256, &presented) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── Satellites ─────────────────────────────────────────────────

    /// Register a satellite and issue its agent key.
    pub fn register_satellite(&self, new: &NewSatellite) -> StateResult<RegisteredSatellite> {
        let api_key = credentials::generate_secret()?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let id = {
            let mut names = txn.open_table(SATELLITE_NAMES).map_err(map_err!(Table))?;
            if names
                .get(new.name.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::Conflict(format!(
                    "satellite name '{}' is taken",
                    new.name
                )));
            }
            let id = next_id(&txn, SATELLITE_SEQ)?;
            names
                .insert(new.name.as_str(), id)
                .map_err(map_err!(Write))?;
            id
        };
        let record = SatelliteRecord {
            id,
            name: new.name.clone(),
            ip_address: new.ip_address.clone(),
            hostname: new.hostname.clone(),
            api_key: api_key.clone(),
            status: SATELLITE_ONLINE.to_string(),
            last_heartbeat: None,
            created_at: epoch_secs(),
            capabilities: new.capabilities.clone(),
        };
        {
            let value = to_json(&record)?;
            let mut table = txn.open_table(SATELLITES).map_err(map_err!(Table))?;
            table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(satellite_id = id, name = %new.name, "satellite registered");
        Ok(RegisteredSatellite {
            satellite_id: id,
            api_key,
        })
    }

    /// Get a satellite by id.
    pub fn get_satellite(&self, id: SatelliteId) -> StateResult<Option<Satellite>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SATELLITES).map_err(map_err!(Table))?;
        match table.get(id).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: SatelliteRecord = from_json(guard.value())?;
                Ok(Some(record.into()))
            }
            None => Ok(None),
        }
    }

    /// Get a satellite row including its agent key. Only used to address the
    /// satellite's agent.
    pub fn satellite_record(&self, id: SatelliteId) -> StateResult<Option<SatelliteRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SATELLITES).map_err(map_err!(Table))?;
        lookup_satellite(&table, id)
    }

    /// List all satellites in id order.
    pub fn list_satellites(&self) -> StateResult<Vec<Satellite>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SATELLITES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: SatelliteRecord = from_json(value.value())?;
            results.push(record.into());
        }
        Ok(results)
    }

    /// Record a heartbeat: set the reported status and last-seen timestamp.
    pub fn record_heartbeat(&self, id: SatelliteId, status: &str) -> StateResult<Satellite> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(SATELLITES).map_err(map_err!(Table))?;
            let mut record: SatelliteRecord = match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => from_json(guard.value())?,
                None => return Err(StateError::NotFound(format!("satellite {id}"))),
            };
            record.status = status.to_string();
            record.last_heartbeat = Some(epoch_secs());
            let value = to_json(&record)?;
            table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(satellite_id = id, %status, "heartbeat recorded");
        Ok(record.into())
    }

    /// Delete a satellite together with every capsule bound to it and their
    /// deployment history, in one transaction. Returns the removed capsule ids.
    pub fn delete_satellite(&self, id: SatelliteId) -> StateResult<Vec<CapsuleId>> {
        self.remove_satellite(id, None)
    }

    /// Like [`delete_satellite`](Self::delete_satellite), but only if the
    /// capsules bound to the satellite are exactly `expected`. Fails with
    /// `Conflict` and removes nothing otherwise.
    pub fn delete_satellite_expecting(
        &self,
        id: SatelliteId,
        expected: &[CapsuleId],
    ) -> StateResult<Vec<CapsuleId>> {
        self.remove_satellite(id, Some(expected))
    }

    fn remove_satellite(
        &self,
        id: SatelliteId,
        expected: Option<&[CapsuleId]>,
    ) -> StateResult<Vec<CapsuleId>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record: SatelliteRecord = {
            let table = txn.open_table(SATELLITES).map_err(map_err!(Table))?;
            match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => from_json(guard.value())?,
                None => return Err(StateError::NotFound(format!("satellite {id}"))),
            }
        };

        let bound: Vec<Capsule> = {
            let table = txn.open_table(CAPSULES).map_err(map_err!(Table))?;
            let mut bound = Vec::new();
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, value) = entry.map_err(map_err!(Read))?;
                let capsule: Capsule = from_json(value.value())?;
                if capsule.satellite_id == id {
                    bound.push(capsule);
                }
            }
            bound
        };

        if let Some(expected) = expected {
            let mut found: Vec<CapsuleId> = bound.iter().map(|c| c.id).collect();
            let mut wanted = expected.to_vec();
            found.sort_unstable();
            wanted.sort_unstable();
            if found != wanted {
                return Err(StateError::Conflict(format!(
                    "capsules bound to satellite {id} changed during delete"
                )));
            }
        }

        for capsule in &bound {
            remove_capsule_rows(&txn, capsule)?;
        }

        {
            let mut names = txn.open_table(SATELLITE_NAMES).map_err(map_err!(Table))?;
            names.remove(record.name.as_str()).map_err(map_err!(Write))?;
            let mut table = txn.open_table(SATELLITES).map_err(map_err!(Table))?;
            table.remove(id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;

        let removed: Vec<CapsuleId> = bound.iter().map(|c| c.id).collect();
        info!(
            satellite_id = id,
            capsules_removed = removed.len(),
            "satellite deleted"
        );
        Ok(removed)
    }

    // ── Capsules ───────────────────────────────────────────────────

    /// Create a capsule bound to an existing satellite.
    ///
    /// Checks, in order: the satellite exists, the manifest passes the
    /// validator, the name is free.
    pub fn create_capsule(&self, new: &NewCapsule) -> StateResult<CapsuleId> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let satellites = txn.open_table(SATELLITES).map_err(map_err!(Table))?;
            if satellites
                .get(new.satellite_id)
                .map_err(map_err!(Read))?
                .is_none()
            {
                return Err(StateError::NotFound(format!(
                    "satellite {}",
                    new.satellite_id
                )));
            }
        }

        let verdict = self.validator.validate(&new.compose_file);
        if !verdict.accepted() {
            return Err(StateError::ValidationFailed(verdict.into_violations()));
        }

        let id = {
            let mut names = txn.open_table(CAPSULE_NAMES).map_err(map_err!(Table))?;
            if names
                .get(new.name.as_str())
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::Conflict(format!(
                    "capsule name '{}' is taken",
                    new.name
                )));
            }
            let id = next_id(&txn, CAPSULE_SEQ)?;
            names
                .insert(new.name.as_str(), id)
                .map_err(map_err!(Write))?;
            id
        };

        let now = epoch_secs();
        let capsule = Capsule {
            id,
            name: new.name.clone(),
            satellite_id: new.satellite_id,
            git_url: new.git_url.clone(),
            git_branch: new.git_branch.clone(),
            compose_file: Some(new.compose_file.clone()),
            status: CapsuleStatus::Stopped,
            created_at: now,
            updated_at: now,
        };
        {
            let value = to_json(&capsule)?;
            let mut table = txn.open_table(CAPSULES).map_err(map_err!(Table))?;
            table.insert(id, value.as_slice()).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        info!(
            capsule_id = id,
            name = %new.name,
            satellite_id = new.satellite_id,
            "capsule created"
        );
        Ok(id)
    }

    /// Get a capsule joined with its satellite's display fields.
    pub fn get_capsule(&self, id: CapsuleId) -> StateResult<Option<CapsuleView>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let capsules = txn.open_table(CAPSULES).map_err(map_err!(Table))?;
        let satellites = txn.open_table(SATELLITES).map_err(map_err!(Table))?;
        let capsule: Capsule = match capsules.get(id).map_err(map_err!(Read))? {
            Some(guard) => from_json(guard.value())?,
            None => return Ok(None),
        };
        let satellite = lookup_satellite(&satellites, capsule.satellite_id)?;
        Ok(Some(join_view(capsule, satellite)))
    }

    /// List all capsules, joined with their satellites, in id order.
    pub fn list_capsules(&self) -> StateResult<Vec<CapsuleView>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let capsules = txn.open_table(CAPSULES).map_err(map_err!(Table))?;
        let satellites = txn.open_table(SATELLITES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in capsules.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let capsule: Capsule = from_json(value.value())?;
            let satellite = lookup_satellite(&satellites, capsule.satellite_id)?;
            results.push(join_view(capsule, satellite));
        }
        Ok(results)
    }

    /// Load a capsule with its satellite's address and agent key.
    pub fn dispatch_target(&self, id: CapsuleId) -> StateResult<Option<DispatchTarget>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let capsules = txn.open_table(CAPSULES).map_err(map_err!(Table))?;
        let satellites = txn.open_table(SATELLITES).map_err(map_err!(Table))?;
        let capsule: Capsule = match capsules.get(id).map_err(map_err!(Read))? {
            Some(guard) => from_json(guard.value())?,
            None => return Ok(None),
        };
        let Some(satellite) = lookup_satellite(&satellites, capsule.satellite_id)? else {
            return Ok(None);
        };
        Ok(Some(DispatchTarget {
            satellite_id: satellite.id,
            satellite_name: satellite.name,
            address: satellite.ip_address,
            api_key: satellite.api_key,
            capsule,
        }))
    }

    /// Delete a capsule and its deployment history.
    pub fn delete_capsule(&self, id: CapsuleId) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let capsule: Capsule = {
            let table = txn.open_table(CAPSULES).map_err(map_err!(Table))?;
            match table.get(id).map_err(map_err!(Read))? {
                Some(guard) => from_json(guard.value())?,
                None => return Err(StateError::NotFound(format!("capsule {id}"))),
            }
        };
        let history = remove_capsule_rows(&txn, &capsule)?;
        txn.commit().map_err(map_err!(Transaction))?;
        info!(capsule_id = id, deployments_removed = history, "capsule deleted");
        Ok(())
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Append a deployment record and update the capsule it belongs to, in
    /// one transaction.
    ///
    /// A successful deploy sets the capsule `running` and stores the
    /// dispatched manifest as its last-known-good copy; a successful stop
    /// sets it `stopped`; a failure applies `failure_status` if given and
    /// otherwise leaves the status as it was.
    pub fn record_deployment(&self, entry: &DeploymentEntry) -> StateResult<Deployment> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut capsule: Capsule = {
            let table = txn.open_table(CAPSULES).map_err(map_err!(Table))?;
            match table.get(entry.capsule_id).map_err(map_err!(Read))? {
                Some(guard) => from_json(guard.value())?,
                None => {
                    return Err(StateError::NotFound(format!(
                        "capsule {}",
                        entry.capsule_id
                    )));
                }
            }
        };

        let now = epoch_secs();
        let id = next_id(&txn, DEPLOYMENT_SEQ)?;
        let (status, output, error) = match &entry.outcome {
            DeploymentOutcome::Success(output) => {
                (DeploymentStatus::Success, Some(output.clone()), None)
            }
            DeploymentOutcome::Failed(error) => {
                (DeploymentStatus::Failed, None, Some(error.clone()))
            }
        };
        let deployment = Deployment {
            id,
            capsule_id: entry.capsule_id,
            action: entry.action,
            status,
            output,
            error,
            created_at: now,
        };

        match (status, entry.action) {
            (DeploymentStatus::Success, DeploymentAction::Deploy) => {
                capsule.status = CapsuleStatus::Running;
                if let Some(manifest) = &entry.manifest {
                    capsule.compose_file = Some(manifest.clone());
                }
            }
            (DeploymentStatus::Success, DeploymentAction::Stop) => {
                capsule.status = CapsuleStatus::Stopped;
            }
            (DeploymentStatus::Failed, _) => {
                if let Some(failed) = entry.failure_status {
                    capsule.status = failed;
                }
            }
        }
        capsule.updated_at = now;

        {
            let value = to_json(&deployment)?;
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert((entry.capsule_id, id), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        {
            let value = to_json(&capsule)?;
            let mut table = txn.open_table(CAPSULES).map_err(map_err!(Table))?;
            table
                .insert(capsule.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            deployment_id = id,
            capsule_id = entry.capsule_id,
            action = ?entry.action,
            status = ?status,
            capsule_status = capsule.status.as_str(),
            "deployment recorded"
        );
        Ok(deployment)
    }

    /// Deployment history for a capsule, newest first, at most `limit` rows.
    pub fn list_deployments(
        &self,
        capsule_id: CapsuleId,
        limit: usize,
    ) -> StateResult<Vec<Deployment>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        let range = table
            .range((capsule_id, 0)..=(capsule_id, u64::MAX))
            .map_err(map_err!(Read))?;
        for entry in range.rev() {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(from_json(value.value())?);
        }
        Ok(results)
    }

    // ── Health ─────────────────────────────────────────────────────

    /// Number of registered satellites and capsules.
    pub fn counts(&self) -> StateResult<RegistryCounts> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let satellites = txn.open_table(SATELLITES).map_err(map_err!(Table))?;
        let capsules = txn.open_table(CAPSULES).map_err(map_err!(Table))?;
        Ok(RegistryCounts {
            satellite_count: satellites.len().map_err(map_err!(Read))?,
            capsule_count: capsules.len().map_err(map_err!(Read))?,
        })
    }
}

// ── Transaction helpers ────────────────────────────────────────────

/// Advance a sequence and return the new id. Starts at 1.
fn next_id(txn: &WriteTransaction, sequence: &str) -> StateResult<u64> {
    let mut table = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
    let current = table
        .get(sequence)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let next = current + 1;
    table.insert(sequence, next).map_err(map_err!(Write))?;
    Ok(next)
}

/// Remove a capsule row, its name index entry, and its deployment history.
/// Returns the number of deployment records removed.
fn remove_capsule_rows(txn: &WriteTransaction, capsule: &Capsule) -> StateResult<usize> {
    {
        let mut names = txn.open_table(CAPSULE_NAMES).map_err(map_err!(Table))?;
        names
            .remove(capsule.name.as_str())
            .map_err(map_err!(Write))?;
    }
    {
        let mut table = txn.open_table(CAPSULES).map_err(map_err!(Table))?;
        table.remove(capsule.id).map_err(map_err!(Write))?;
    }
    let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
    let keys: Vec<(u64, u64)> = table
        .range((capsule.id, 0)..=(capsule.id, u64::MAX))
        .map_err(map_err!(Read))?
        .map(|entry| entry.map(|(key, _)| key.value()).map_err(map_err!(Read)))
        .collect::<StateResult<_>>()?;
    for key in &keys {
        table.remove(*key).map_err(map_err!(Write))?;
    }
    Ok(keys.len())
}

fn lookup_satellite(
    table: &impl ReadableTable<u64, &'static [u8]>,
    id: SatelliteId,
) -> StateResult<Option<SatelliteRecord>> {
    match table.get(id).map_err(map_err!(Read))? {
        Some(guard) => Ok(Some(from_json(guard.value())?)),
        None => Ok(None),
    }
}

fn join_view(capsule: Capsule, satellite: Option<SatelliteRecord>) -> CapsuleView {
    let (satellite_name, satellite_hostname, satellite_ip) = match satellite {
        Some(s) => (s.name, s.hostname, s.ip_address),
        None => Default::default(),
    };
    CapsuleView {
        capsule,
        satellite_name,
        satellite_hostname,
        satellite_ip,
    }
}

fn to_json<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "services:\n  web:\n    image: nginx\n    ports:\n      - \"80:80\"\n";

    fn new_satellite(name: &str) -> NewSatellite {
        NewSatellite {
            name: name.to_string(),
            ip_address: "10.0.0.5".to_string(),
            hostname: format!("{name}.lan"),
            capabilities: vec!["docker".to_string()],
        }
    }

    fn new_capsule(name: &str, satellite_id: SatelliteId) -> NewCapsule {
        NewCapsule {
            name: name.to_string(),
            satellite_id,
            git_url: "https://git.example.com/app.git".to_string(),
            git_branch: DEFAULT_BRANCH.to_string(),
            compose_file: MANIFEST.to_string(),
        }
    }

    fn entry(capsule_id: CapsuleId, action: DeploymentAction, ok: bool) -> DeploymentEntry {
        DeploymentEntry {
            capsule_id,
            action,
            outcome: if ok {
                DeploymentOutcome::Success("{\"message\":\"ok\"}".to_string())
            } else {
                DeploymentOutcome::Failed("agent unreachable".to_string())
            },
            manifest: None,
            failure_status: None,
        }
    }

    // ── Satellites ─────────────────────────────────────────────────

    #[test]
    fn register_and_get_satellite() {
        let store = StateStore::open_in_memory().unwrap();
        let reg = store.register_satellite(&new_satellite("sat-a")).unwrap();

        assert_eq!(reg.satellite_id, 1);
        assert_eq!(reg.api_key.len(), 64);

        let sat = store.get_satellite(reg.satellite_id).unwrap().unwrap();
        assert_eq!(sat.name, "sat-a");
        assert_eq!(sat.status, "online");
        assert_eq!(sat.capabilities, vec!["docker".to_string()]);
        assert!(sat.last_heartbeat.is_none());
    }

    #[test]
    fn duplicate_satellite_name_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let first = store.register_satellite(&new_satellite("sat-a")).unwrap();

        let mut again = new_satellite("sat-a");
        again.ip_address = "10.9.9.9".to_string();
        let err = store.register_satellite(&again).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));

        let all = store.list_satellites().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, first.satellite_id);
        assert_eq!(all[0].ip_address, "10.0.0.5");
    }

    #[test]
    fn listing_never_exposes_api_key() {
        let store = StateStore::open_in_memory().unwrap();
        let reg = store.register_satellite(&new_satellite("sat-a")).unwrap();
        let json = serde_json::to_string(&store.list_satellites().unwrap()).unwrap();
        assert!(!json.contains(&reg.api_key));
        assert!(!json.contains("api_key"));
    }

    #[test]
    fn heartbeat_updates_status() {
        let store = StateStore::open_in_memory().unwrap();
        let reg = store.register_satellite(&new_satellite("sat-a")).unwrap();

        let sat = store.record_heartbeat(reg.satellite_id, "offline").unwrap();
        assert_eq!(sat.status, "offline");
        assert!(sat.last_heartbeat.is_some());

        let err = store.record_heartbeat(99, "online").unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn ids_are_never_reused() {
        let store = StateStore::open_in_memory().unwrap();
        let a = store.register_satellite(&new_satellite("a")).unwrap();
        store.delete_satellite(a.satellite_id).unwrap();
        let b = store.register_satellite(&new_satellite("a")).unwrap();
        assert!(b.satellite_id > a.satellite_id);
    }

    #[test]
    fn delete_satellite_cascades_to_capsules_and_history() {
        let store = StateStore::open_in_memory().unwrap();
        let sat = store.register_satellite(&new_satellite("sat-a")).unwrap().satellite_id;
        let other = store.register_satellite(&new_satellite("sat-b")).unwrap().satellite_id;
        let c1 = store.create_capsule(&new_capsule("app1", sat)).unwrap();
        let c2 = store.create_capsule(&new_capsule("app2", sat)).unwrap();
        let keep = store.create_capsule(&new_capsule("app3", other)).unwrap();
        store.record_deployment(&entry(c1, DeploymentAction::Deploy, true)).unwrap();

        let removed = store.delete_satellite(sat).unwrap();
        assert_eq!(removed, vec![c1, c2]);

        let remaining = store.list_capsules().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].capsule.id, keep);
        assert!(store.get_satellite(sat).unwrap().is_none());
        assert!(store.list_deployments(c1, 10).unwrap().is_empty());

        // Names are released with their rows.
        store.register_satellite(&new_satellite("sat-a")).unwrap();
        store.create_capsule(&new_capsule("app1", other)).unwrap();
    }

    #[test]
    fn delete_satellite_with_stale_capsule_set_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let sat = store.register_satellite(&new_satellite("sat-a")).unwrap().satellite_id;
        let c1 = store.create_capsule(&new_capsule("app1", sat)).unwrap();
        let c2 = store.create_capsule(&new_capsule("app2", sat)).unwrap();

        let err = store.delete_satellite_expecting(sat, &[c1]).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
        assert!(store.get_satellite(sat).unwrap().is_some());
        assert_eq!(store.list_capsules().unwrap().len(), 2);

        let removed = store.delete_satellite_expecting(sat, &[c2, c1]).unwrap();
        assert_eq!(removed, vec![c1, c2]);
        assert!(store.get_satellite(sat).unwrap().is_none());
    }

    #[test]
    fn delete_missing_satellite_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.delete_satellite(7).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    // ── Capsules ───────────────────────────────────────────────────

    #[test]
    fn create_capsule_for_missing_satellite_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store.create_capsule(&new_capsule("app1", 42)).unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
        assert!(store.list_capsules().unwrap().is_empty());
    }

    #[test]
    fn create_capsule_rejects_dangerous_manifest() {
        let store = StateStore::open_in_memory().unwrap();
        let sat = store.register_satellite(&new_satellite("sat-a")).unwrap().satellite_id;
        let mut capsule = new_capsule("app1", sat);
        capsule.compose_file = "services:\n  app:\n    privileged: true\n".to_string();

        match store.create_capsule(&capsule).unwrap_err() {
            StateError::ValidationFailed(violations) => {
                assert_eq!(violations, vec!["forbidden directive: privileged: true"]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.list_capsules().unwrap().is_empty());
    }

    #[test]
    fn duplicate_capsule_name_conflicts() {
        let store = StateStore::open_in_memory().unwrap();
        let sat = store.register_satellite(&new_satellite("sat-a")).unwrap().satellite_id;
        store.create_capsule(&new_capsule("app1", sat)).unwrap();
        let err = store.create_capsule(&new_capsule("app1", sat)).unwrap_err();
        assert!(matches!(err, StateError::Conflict(_)));
    }

    #[test]
    fn capsule_view_joins_satellite() {
        let store = StateStore::open_in_memory().unwrap();
        let sat = store.register_satellite(&new_satellite("sat-a")).unwrap().satellite_id;
        let id = store.create_capsule(&new_capsule("app1", sat)).unwrap();

        let view = store.get_capsule(id).unwrap().unwrap();
        assert_eq!(view.capsule.status, CapsuleStatus::Stopped);
        assert_eq!(view.capsule.compose_file.as_deref(), Some(MANIFEST));
        assert_eq!(view.satellite_name, "sat-a");
        assert_eq!(view.satellite_hostname, "sat-a.lan");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["satellite_name"], "sat-a");
        assert_eq!(json["status"], "stopped");
    }

    #[test]
    fn dispatch_target_carries_agent_key() {
        let store = StateStore::open_in_memory().unwrap();
        let reg = store.register_satellite(&new_satellite("sat-a")).unwrap();
        let id = store.create_capsule(&new_capsule("app1", reg.satellite_id)).unwrap();

        let target = store.dispatch_target(id).unwrap().unwrap();
        assert_eq!(target.api_key, reg.api_key);
        assert_eq!(target.address, "10.0.0.5");
        assert!(!format!("{target:?}").contains(&reg.api_key));
        assert!(store.dispatch_target(99).unwrap().is_none());
    }

    #[test]
    fn delete_capsule_removes_history() {
        let store = StateStore::open_in_memory().unwrap();
        let sat = store.register_satellite(&new_satellite("sat-a")).unwrap().satellite_id;
        let id = store.create_capsule(&new_capsule("app1", sat)).unwrap();
        store.record_deployment(&entry(id, DeploymentAction::Deploy, true)).unwrap();

        store.delete_capsule(id).unwrap();
        assert!(store.get_capsule(id).unwrap().is_none());
        assert!(store.list_deployments(id, 10).unwrap().is_empty());
        assert!(matches!(
            store.delete_capsule(id).unwrap_err(),
            StateError::NotFound(_)
        ));
    }

    // ── Deployments ────────────────────────────────────────────────

    #[test]
    fn deploy_then_stop_transitions_status() {
        let store = StateStore::open_in_memory().unwrap();
        let sat = store.register_satellite(&new_satellite("sat-a")).unwrap().satellite_id;
        let id = store.create_capsule(&new_capsule("app1", sat)).unwrap();

        let mut deploy = entry(id, DeploymentAction::Deploy, true);
        deploy.manifest = Some("services: {}\n".to_string());
        store.record_deployment(&deploy).unwrap();
        let view = store.get_capsule(id).unwrap().unwrap();
        assert_eq!(view.capsule.status, CapsuleStatus::Running);
        assert_eq!(view.capsule.compose_file.as_deref(), Some("services: {}\n"));

        store.record_deployment(&entry(id, DeploymentAction::Stop, true)).unwrap();
        let view = store.get_capsule(id).unwrap().unwrap();
        assert_eq!(view.capsule.status, CapsuleStatus::Stopped);

        let history = store.list_deployments(id, 10).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, DeploymentAction::Stop);
        assert_eq!(history[1].action, DeploymentAction::Deploy);
        assert!(history.iter().all(|d| d.status == DeploymentStatus::Success));
    }

    #[test]
    fn failed_attempt_keeps_status_unless_told_otherwise() {
        let store = StateStore::open_in_memory().unwrap();
        let sat = store.register_satellite(&new_satellite("sat-a")).unwrap().satellite_id;
        let id = store.create_capsule(&new_capsule("app1", sat)).unwrap();
        store.record_deployment(&entry(id, DeploymentAction::Deploy, true)).unwrap();

        let failed = store
            .record_deployment(&entry(id, DeploymentAction::Deploy, false))
            .unwrap();
        assert_eq!(failed.status, DeploymentStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("agent unreachable"));
        assert_eq!(
            store.get_capsule(id).unwrap().unwrap().capsule.status,
            CapsuleStatus::Running
        );

        let mut marked = entry(id, DeploymentAction::Stop, false);
        marked.failure_status = Some(CapsuleStatus::Failed);
        store.record_deployment(&marked).unwrap();
        assert_eq!(
            store.get_capsule(id).unwrap().unwrap().capsule.status,
            CapsuleStatus::Failed
        );
    }

    #[test]
    fn record_for_missing_capsule_is_not_found() {
        let store = StateStore::open_in_memory().unwrap();
        let err = store
            .record_deployment(&entry(5, DeploymentAction::Deploy, true))
            .unwrap_err();
        assert!(matches!(err, StateError::NotFound(_)));
    }

    #[test]
    fn deployment_history_is_scoped_and_limited() {
        let store = StateStore::open_in_memory().unwrap();
        let sat = store.register_satellite(&new_satellite("sat-a")).unwrap().satellite_id;
        let a = store.create_capsule(&new_capsule("a", sat)).unwrap();
        let b = store.create_capsule(&new_capsule("b", sat)).unwrap();
        for _ in 0..3 {
            store.record_deployment(&entry(a, DeploymentAction::Deploy, true)).unwrap();
        }
        store.record_deployment(&entry(b, DeploymentAction::Deploy, false)).unwrap();

        assert_eq!(store.list_deployments(a, 10).unwrap().len(), 3);
        assert_eq!(store.list_deployments(a, 2).unwrap().len(), 2);
        assert_eq!(store.list_deployments(b, 10).unwrap().len(), 1);
    }

    // ── Admin credential ───────────────────────────────────────────

    #[test]
    fn admin_credential_created_once() {
        let store = StateStore::open_in_memory().unwrap();
        let secret = store.ensure_admin_credential("admin").unwrap().unwrap();
        assert!(store.ensure_admin_credential("admin").unwrap().is_none());

        assert!(store.verify_admin_secret(&secret).unwrap());
        assert!(!store.verify_admin_secret("wrong").unwrap());
    }

    #[test]
    fn counts_reflect_rows() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(store.counts().unwrap(), RegistryCounts::default());
        let sat = store.register_satellite(&new_satellite("sat-a")).unwrap().satellite_id;
        store.create_capsule(&new_capsule("app1", sat)).unwrap();
        let counts = store.counts().unwrap();
        assert_eq!(counts.satellite_count, 1);
        assert_eq!(counts.capsule_count, 1);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("overseer.redb");

        let secret = {
            let store = StateStore::open(&db_path).unwrap();
            let sat = store.register_satellite(&new_satellite("sat-a")).unwrap().satellite_id;
            store.create_capsule(&new_capsule("app1", sat)).unwrap();
            store.ensure_admin_credential("admin").unwrap().unwrap()
        };

        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.list_capsules().unwrap().len(), 1);
        assert!(store.ensure_admin_credential("admin").unwrap().is_none());
        assert!(store.verify_admin_secret(&secret).unwrap());
        let next = store.register_satellite(&new_satellite("sat-b")).unwrap();
        assert_eq!(next.satellite_id, 2);
    }
}
