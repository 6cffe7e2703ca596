//! Capsule lifecycle dispatch.
//!
//! `deploy` and `stop` run to completion inside a spawned task while holding
//! the capsule's lock. A caller that goes away mid-operation therefore does not
//! cancel it: the agent call resolves and its deployment record is still
//! written. Agent calls are additionally capped per satellite so that a hung
//! host cannot absorb every dispatch slot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use voidnet_state::{
    CapsuleId, CapsuleStatus, CapsuleView, Deployment, DeploymentAction, DeploymentEntry,
    DeploymentOutcome, DispatchTarget, SatelliteId, StateError, StateStore,
};
use voidnet_uplink::{AgentEndpoint, SatelliteAgent};

use crate::error::{OrchestratorError, OrchestratorResult};
use crate::locks::{CapsuleLocks, InFlight};
use crate::source::ManifestSource;

/// Tunables for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Persist `failed` as the capsule status when the agent rejects an
    /// operation. Otherwise the status is left as it was.
    pub mark_failed_capsules: bool,
    /// Concurrent agent calls allowed per satellite.
    pub max_in_flight_per_satellite: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            mark_failed_capsules: false,
            max_in_flight_per_satellite: 4,
        }
    }
}

/// Rounds `delete_satellite` makes before giving up on a satellite whose
/// capsule set keeps changing.
const MAX_DELETE_ATTEMPTS: usize = 8;

/// Successful deploy or stop.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub deployment: Deployment,
    /// Agent response payload.
    pub result: Value,
}

/// Controller core: registry access plus remote dispatch.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    store: StateStore,
    agent: Arc<dyn SatelliteAgent>,
    source: Arc<dyn ManifestSource>,
    settings: DispatchSettings,
    locks: CapsuleLocks,
    in_flight: InFlight,
    /// Per-satellite agent call slots.
    slots: Mutex<HashMap<SatelliteId, Arc<Semaphore>>>,
    /// Dispatch tasks started and not yet finished.
    active: AtomicUsize,
    draining: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        store: StateStore,
        agent: Arc<dyn SatelliteAgent>,
        source: Arc<dyn ManifestSource>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                agent,
                source,
                settings,
                locks: CapsuleLocks::new(),
                in_flight: InFlight::new(),
                slots: Mutex::new(HashMap::new()),
                active: AtomicUsize::new(0),
                draining: AtomicBool::new(false),
            }),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    pub fn settings(&self) -> DispatchSettings {
        self.inner.settings
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Fetch, validate, and deploy a capsule's manifest on its satellite.
    pub async fn deploy(&self, capsule_id: CapsuleId) -> OrchestratorResult<DispatchReport> {
        self.spawn_dispatch(capsule_id, DeploymentAction::Deploy).await
    }

    /// Stop a capsule on its satellite.
    pub async fn stop(&self, capsule_id: CapsuleId) -> OrchestratorResult<DispatchReport> {
        self.spawn_dispatch(capsule_id, DeploymentAction::Stop).await
    }

    async fn spawn_dispatch(
        &self,
        capsule_id: CapsuleId,
        action: DeploymentAction,
    ) -> OrchestratorResult<DispatchReport> {
        if self.is_draining() {
            return Err(OrchestratorError::Draining);
        }
        let inner = Arc::clone(&self.inner);
        let active = ActiveTask::start(Arc::clone(&inner));
        let task = tokio::spawn(async move {
            let _active = active;
            match action {
                DeploymentAction::Deploy => inner.run_deploy(capsule_id).await,
                DeploymentAction::Stop => inner.run_stop(capsule_id).await,
            }
        });
        task.await.map_err(|e| OrchestratorError::Task(e.to_string()))?
    }

    /// Agent log passthrough. No state change, no record.
    pub async fn logs(&self, capsule_id: CapsuleId, tail: u32) -> OrchestratorResult<Value> {
        let target = self.inner.target(capsule_id)?;
        let endpoint = endpoint(&target);
        let _permit = self.inner.satellite_slot(target.satellite_id).await?;
        Ok(self.inner.agent.logs(&endpoint, capsule_id, tail).await?)
    }

    /// Agent container listing for a satellite.
    pub async fn satellite_containers(
        &self,
        satellite_id: SatelliteId,
    ) -> OrchestratorResult<Value> {
        let endpoint = self.inner.satellite_endpoint(satellite_id)?;
        let _permit = self.inner.satellite_slot(satellite_id).await?;
        Ok(self.inner.agent.containers(&endpoint).await?)
    }

    /// Agent self-report for a satellite.
    pub async fn satellite_agent_health(
        &self,
        satellite_id: SatelliteId,
    ) -> OrchestratorResult<Value> {
        let endpoint = self.inner.satellite_endpoint(satellite_id)?;
        let _permit = self.inner.satellite_slot(satellite_id).await?;
        Ok(self.inner.agent.health(&endpoint).await?)
    }

    // ── Registry operations that must respect dispatch ─────────────

    /// Delete a capsule once any in-flight operation on it has finished.
    pub async fn delete_capsule(&self, capsule_id: CapsuleId) -> OrchestratorResult<()> {
        let _guard = self.inner.locks.acquire(capsule_id).await;
        self.inner.store.delete_capsule(capsule_id)?;
        Ok(())
    }

    /// Delete a satellite and its capsules once in-flight operations on those
    /// capsules have finished.
    ///
    /// The delete only commits if the bound capsules are still exactly the
    /// ones locked; a capsule created in between forces another round.
    pub async fn delete_satellite(
        &self,
        satellite_id: SatelliteId,
    ) -> OrchestratorResult<Vec<CapsuleId>> {
        let mut attempt = 0;
        let removed = loop {
            attempt += 1;
            let mut bound: Vec<CapsuleId> = self
                .inner
                .store
                .list_capsules()?
                .into_iter()
                .filter(|view| view.capsule.satellite_id == satellite_id)
                .map(|view| view.capsule.id)
                .collect();
            bound.sort_unstable();

            // Ascending order; dispatch never holds more than one capsule lock.
            let mut guards = Vec::with_capacity(bound.len());
            for capsule_id in &bound {
                guards.push(self.inner.locks.acquire(*capsule_id).await);
            }
            match self.inner.store.delete_satellite_expecting(satellite_id, &bound) {
                Ok(removed) => break removed,
                Err(StateError::Conflict(reason)) if attempt < MAX_DELETE_ATTEMPTS => {
                    debug!(satellite_id, attempt, %reason, "capsule set changed, retrying delete");
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&satellite_id);
        Ok(removed)
    }

    // ── Views ──────────────────────────────────────────────────────

    /// Capsules with their live status.
    pub fn list_capsules(&self) -> OrchestratorResult<Vec<CapsuleView>> {
        let live = self.inner.in_flight.snapshot();
        let mut views = self.inner.store.list_capsules()?;
        for view in &mut views {
            if let Some(action) = live.get(&view.capsule.id) {
                view.capsule.status = transient_status(*action);
            }
        }
        Ok(views)
    }

    /// One capsule with its live status.
    pub fn get_capsule(&self, capsule_id: CapsuleId) -> OrchestratorResult<Option<CapsuleView>> {
        let Some(mut view) = self.inner.store.get_capsule(capsule_id)? else {
            return Ok(None);
        };
        if let Some(action) = self.inner.in_flight.action(capsule_id) {
            view.capsule.status = transient_status(action);
        }
        Ok(Some(view))
    }

    // ── Shutdown ───────────────────────────────────────────────────

    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::SeqCst)
    }

    /// Refuse new deploy/stop calls and wait for running ones to finish.
    ///
    /// Returns the number of operations still running when `timeout`
    /// expired (0 if all completed).
    pub async fn drain(&self, timeout: Duration) -> usize {
        self.inner.draining.store(true, Ordering::SeqCst);
        info!(?timeout, "dispatch draining started");

        let deadline = Instant::now() + timeout;
        let poll_interval = Duration::from_millis(50);
        loop {
            let remaining = self.inner.active.load(Ordering::SeqCst);
            if remaining == 0 {
                info!("all dispatch operations drained");
                return 0;
            }
            if Instant::now() >= deadline {
                warn!(remaining, "drain timeout expired with operations in flight");
                return remaining;
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl Inner {
    fn target(&self, capsule_id: CapsuleId) -> OrchestratorResult<DispatchTarget> {
        self.store
            .dispatch_target(capsule_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("capsule {capsule_id}")))
    }

    fn satellite_endpoint(&self, satellite_id: SatelliteId) -> OrchestratorResult<AgentEndpoint> {
        let record = self
            .store
            .satellite_record(satellite_id)?
            .ok_or_else(|| OrchestratorError::NotFound(format!("satellite {satellite_id}")))?;
        Ok(AgentEndpoint::new(record.ip_address, record.api_key))
    }

    async fn satellite_slot(
        &self,
        satellite_id: SatelliteId,
    ) -> OrchestratorResult<OwnedSemaphorePermit> {
        let semaphore = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let limit = self.settings.max_in_flight_per_satellite.max(1);
            Arc::clone(
                slots
                    .entry(satellite_id)
                    .or_insert_with(|| Arc::new(Semaphore::new(limit))),
            )
        };
        semaphore
            .acquire_owned()
            .await
            .map_err(|e| OrchestratorError::Task(e.to_string()))
    }

    async fn run_deploy(&self, capsule_id: CapsuleId) -> OrchestratorResult<DispatchReport> {
        let _guard = self.locks.acquire(capsule_id).await;
        let target = self.target(capsule_id)?;
        let _marker = self.in_flight.begin(capsule_id, DeploymentAction::Deploy);
        let capsule = &target.capsule;

        let manifest = match self
            .source
            .fetch(capsule_id, &capsule.git_url, &capsule.git_branch)
            .await
        {
            Ok(manifest) => manifest,
            Err(e) => {
                let message = e.to_string();
                warn!(capsule_id, error = %message, "manifest fetch failed");
                self.record_failure(
                    capsule_id,
                    DeploymentAction::Deploy,
                    &format!("manifest fetch failed: {message}"),
                    None,
                )?;
                return Err(OrchestratorError::Fetch(message));
            }
        };

        let verdict = self.store.validator().validate(&manifest);
        if !verdict.accepted() {
            let violations = verdict.into_violations();
            warn!(capsule_id, violations = violations.len(), "fetched manifest rejected");
            let message = format!("manifest rejected: {}", violations.join("; "));
            self.record_failure(capsule_id, DeploymentAction::Deploy, &message, None)?;
            return Err(OrchestratorError::ValidationFailed(violations));
        }

        let endpoint = endpoint(&target);
        let result = {
            let _permit = self.satellite_slot(target.satellite_id).await?;
            debug!(capsule_id, satellite = %target.satellite_name, "dispatching deploy");
            self.agent.deploy(&endpoint, capsule_id, &manifest).await
        };

        match result {
            Ok(payload) => {
                let deployment = self.store.record_deployment(&DeploymentEntry {
                    capsule_id,
                    action: DeploymentAction::Deploy,
                    outcome: DeploymentOutcome::Success(payload.to_string()),
                    manifest: Some(manifest),
                    failure_status: None,
                })?;
                info!(capsule_id, deployment_id = deployment.id, "capsule deployed");
                Ok(DispatchReport {
                    deployment,
                    result: payload,
                })
            }
            Err(e) => {
                warn!(capsule_id, error = %e, "agent deploy failed");
                self.record_failure(
                    capsule_id,
                    DeploymentAction::Deploy,
                    &e.to_string(),
                    self.agent_failure_status(),
                )?;
                Err(e.into())
            }
        }
    }

    async fn run_stop(&self, capsule_id: CapsuleId) -> OrchestratorResult<DispatchReport> {
        let _guard = self.locks.acquire(capsule_id).await;
        let target = self.target(capsule_id)?;
        let _marker = self.in_flight.begin(capsule_id, DeploymentAction::Stop);

        let endpoint = endpoint(&target);
        let result = {
            let _permit = self.satellite_slot(target.satellite_id).await?;
            debug!(capsule_id, satellite = %target.satellite_name, "dispatching stop");
            self.agent.stop(&endpoint, capsule_id).await
        };

        match result {
            Ok(payload) => {
                let deployment = self.store.record_deployment(&DeploymentEntry {
                    capsule_id,
                    action: DeploymentAction::Stop,
                    outcome: DeploymentOutcome::Success(payload.to_string()),
                    manifest: None,
                    failure_status: None,
                })?;
                info!(capsule_id, deployment_id = deployment.id, "capsule stopped");
                Ok(DispatchReport {
                    deployment,
                    result: payload,
                })
            }
            Err(e) => {
                warn!(capsule_id, error = %e, "agent stop failed");
                self.record_failure(
                    capsule_id,
                    DeploymentAction::Stop,
                    &e.to_string(),
                    self.agent_failure_status(),
                )?;
                Err(e.into())
            }
        }
    }

    fn agent_failure_status(&self) -> Option<CapsuleStatus> {
        self.settings
            .mark_failed_capsules
            .then_some(CapsuleStatus::Failed)
    }

    fn record_failure(
        &self,
        capsule_id: CapsuleId,
        action: DeploymentAction,
        error: &str,
        failure_status: Option<CapsuleStatus>,
    ) -> OrchestratorResult<Deployment> {
        Ok(self.store.record_deployment(&DeploymentEntry {
            capsule_id,
            action,
            outcome: DeploymentOutcome::Failed(error.to_string()),
            manifest: None,
            failure_status,
        })?)
    }
}

/// Counts one dispatch task in `Inner::active` until dropped, including when
/// the task unwinds.
struct ActiveTask(Arc<Inner>);

impl ActiveTask {
    fn start(inner: Arc<Inner>) -> Self {
        inner.active.fetch_add(1, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for ActiveTask {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

fn endpoint(target: &DispatchTarget) -> AgentEndpoint {
    AgentEndpoint::new(target.address.clone(), target.api_key.clone())
}

fn transient_status(action: DeploymentAction) -> CapsuleStatus {
    match action {
        DeploymentAction::Deploy => CapsuleStatus::Deploying,
        DeploymentAction::Stop => CapsuleStatus::Stopping,
    }
}
