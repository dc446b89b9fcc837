//! In-memory persistence, for tests and single-process hosts.

use super::DataLayer;
use crate::cancellation::CancellationToken;
use crate::core::{RunRequest, StagePath, StageStatus};
use crate::errors::PersistenceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

/// One collaborator call, recorded in order of arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataAction {
    /// A job was created.
    CreateJob,
    /// An existing job was checked against the running code's version.
    ValidateJob,
    /// A request record was created.
    CreateRequest,
    /// A stage-created record was written.
    CreateStage(StagePath),
    /// A status transition was written.
    SetStatus(StagePath, StageStatus),
    /// A result was saved.
    SaveResult(StagePath),
    /// This run's result was fetched.
    GetCurrentResult(StagePath),
    /// A prior run's result was fetched.
    GetPreviousResult(StagePath),
    /// A host-side marker, recorded through [`InMemoryDataLayer::mark`].
    Marker(StagePath, String),
}

impl DataAction {
    /// Returns the stage path this action refers to, if any.
    #[must_use]
    pub fn path(&self) -> Option<&StagePath> {
        match self {
            Self::CreateJob | Self::ValidateJob | Self::CreateRequest => None,
            Self::CreateStage(p)
            | Self::SetStatus(p, _)
            | Self::SaveResult(p)
            | Self::GetCurrentResult(p)
            | Self::GetPreviousResult(p)
            | Self::Marker(p, _) => Some(p),
        }
    }
}

/// A stored job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    /// The generated job identifier.
    pub id: String,
    /// The kernel that created the job.
    pub kernel: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A [`DataLayer`] backed by path-keyed maps and an append-only action log.
///
/// Results are split into a *current* store written by this run and a
/// *previous* store seeded through [`Self::seed_previous_result`], mirroring
/// how a durable backend distinguishes this run's output from an earlier
/// run's. The action log captures the exact collaborator call sequence,
/// which is what tests assert against.
#[derive(Debug, Default)]
pub struct InMemoryDataLayer {
    jobs: RwLock<Vec<JobRecord>>,
    created: RwLock<BTreeMap<StagePath, String>>,
    statuses: RwLock<BTreeMap<StagePath, StageStatus>>,
    current: RwLock<BTreeMap<StagePath, Value>>,
    previous: RwLock<BTreeMap<StagePath, Value>>,
    actions: Mutex<Vec<DataAction>>,
    reject_existing_jobs: AtomicBool,
    fail_status_writes: AtomicBool,
}

impl InMemoryDataLayer {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a result as if an earlier run had persisted it.
    pub fn seed_previous_result(&self, path: StagePath, result: Value) {
        self.previous.write().insert(path, result);
    }

    /// Makes [`DataLayer::validate_existing_job`] reject every job.
    pub fn reject_existing_jobs(&self, reject: bool) {
        self.reject_existing_jobs.store(reject, Ordering::SeqCst);
    }

    /// Makes every status write fail, for exercising lost-write handling.
    pub fn fail_status_writes(&self, fail: bool) {
        self.fail_status_writes.store(fail, Ordering::SeqCst);
    }

    /// Records a host-side marker in the action log. Work closures use this
    /// to interleave their own steps with collaborator calls.
    pub fn mark(&self, path: &StagePath, label: impl Into<String>) {
        self.record(DataAction::Marker(path.clone(), label.into()));
    }

    /// Returns the full action log.
    #[must_use]
    pub fn actions(&self) -> Vec<DataAction> {
        self.actions.lock().clone()
    }

    /// Returns the actions that refer to `path`, in arrival order.
    #[must_use]
    pub fn stage_actions(&self, path: &StagePath) -> Vec<DataAction> {
        self.actions
            .lock()
            .iter()
            .filter(|a| a.path() == Some(path))
            .cloned()
            .collect()
    }

    /// Returns all stored jobs.
    #[must_use]
    pub fn jobs(&self) -> Vec<JobRecord> {
        self.jobs.read().clone()
    }

    /// Returns the paths with a stage-created record, in path order.
    #[must_use]
    pub fn created_paths(&self) -> Vec<StagePath> {
        self.created.read().keys().cloned().collect()
    }

    /// Returns the recorded name of a created stage.
    #[must_use]
    pub fn stage_name(&self, path: &StagePath) -> Option<String> {
        self.created.read().get(path).cloned()
    }

    /// Returns the last written status for `path`.
    #[must_use]
    pub fn status_of(&self, path: &StagePath) -> Option<StageStatus> {
        self.statuses.read().get(path).copied()
    }

    /// Returns all written statuses, in path order.
    #[must_use]
    pub fn statuses(&self) -> BTreeMap<StagePath, StageStatus> {
        self.statuses.read().clone()
    }

    /// Returns the result saved for `path` during this run.
    #[must_use]
    pub fn current_result(&self, path: &StagePath) -> Option<Value> {
        self.current.read().get(path).cloned()
    }

    fn record(&self, action: DataAction) {
        self.actions.lock().push(action);
    }
}

#[async_trait]
impl DataLayer for InMemoryDataLayer {
    async fn is_new_job(
        &self,
        request: &RunRequest,
        _cancel: &CancellationToken,
    ) -> Result<bool, PersistenceError> {
        Ok(!request.has_job_id())
    }

    async fn create_job(
        &self,
        kernel_name: &str,
        _request: &RunRequest,
        _cancel: &CancellationToken,
    ) -> Result<String, PersistenceError> {
        self.record(DataAction::CreateJob);
        let id = Uuid::new_v4().to_string();
        self.jobs.write().push(JobRecord {
            id: id.clone(),
            kernel: kernel_name.to_string(),
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn validate_existing_job(
        &self,
        request: &RunRequest,
        _version: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        self.record(DataAction::ValidateJob);
        if self.reject_existing_jobs.load(Ordering::SeqCst) {
            return Err(PersistenceError::JobRejected(format!(
                "job '{}' is not runnable by this version",
                request.job_id.as_deref().unwrap_or("")
            )));
        }
        Ok(())
    }

    async fn create_request(
        &self,
        _request: &RunRequest,
        _metadata: &Value,
        _cancel: &CancellationToken,
    ) -> Result<String, PersistenceError> {
        self.record(DataAction::CreateRequest);
        Ok(Uuid::new_v4().to_string())
    }

    async fn create_stage(
        &self,
        path: &StagePath,
        name: &str,
        _cancel: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        self.record(DataAction::CreateStage(path.clone()));
        self.created.write().insert(path.clone(), name.to_string());
        Ok(())
    }

    async fn set_status(
        &self,
        path: &StagePath,
        status: StageStatus,
        _cancel: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        self.record(DataAction::SetStatus(path.clone(), status));
        if self.fail_status_writes.load(Ordering::SeqCst) {
            return Err(PersistenceError::WriteFailed(format!(
                "status write refused for stage {path}"
            )));
        }
        self.statuses.write().insert(path.clone(), status);
        Ok(())
    }

    async fn save_result(
        &self,
        path: &StagePath,
        result: &Value,
        _cancel: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        self.record(DataAction::SaveResult(path.clone()));
        self.current.write().insert(path.clone(), result.clone());
        Ok(())
    }

    async fn get_current_result(
        &self,
        path: &StagePath,
        _cancel: &CancellationToken,
    ) -> Result<Option<Value>, PersistenceError> {
        self.record(DataAction::GetCurrentResult(path.clone()));
        Ok(self.current.read().get(path).cloned())
    }

    async fn get_previous_result(
        &self,
        path: &StagePath,
        _cancel: &CancellationToken,
    ) -> Result<Option<Value>, PersistenceError> {
        self.record(DataAction::GetPreviousResult(path.clone()));
        Ok(self.previous.read().get(path).cloned())
    }
}
