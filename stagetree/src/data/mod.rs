//! Persistence collaborator boundary.
//!
//! The kernel records job identity, stage creation, status transitions and
//! results through a [`DataLayer`]. The trait is the only state boundary of
//! the engine; implementations own their storage format and retry policy and
//! must tolerate concurrent calls from sibling branches.

mod memory;

use crate::cancellation::CancellationToken;
use crate::core::{RunRequest, StagePath, StageStatus};
use crate::errors::PersistenceError;
use async_trait::async_trait;
use serde_json::Value;

pub use memory::{DataAction, InMemoryDataLayer, JobRecord};

/// Storage collaborator consumed by the kernel.
///
/// Every operation receives a cancellation signal and may fail. Failures on
/// status and result writes are logged by the scheduler and do not roll back
/// work a branch has already completed; failures during identity resolution
/// or the static build abort the run.
#[async_trait]
pub trait DataLayer: Send + Sync {
    /// Returns true if the request does not yet refer to a stored job.
    async fn is_new_job(
        &self,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<bool, PersistenceError>;

    /// Creates a job for the request and returns its identifier.
    async fn create_job(
        &self,
        kernel_name: &str,
        request: &RunRequest,
        cancel: &CancellationToken,
    ) -> Result<String, PersistenceError>;

    /// Checks that an existing job may be run by this version of the code.
    ///
    /// # Errors
    ///
    /// Returns an error to reject a stale or incompatible job.
    async fn validate_existing_job(
        &self,
        request: &RunRequest,
        version: &str,
        cancel: &CancellationToken,
    ) -> Result<(), PersistenceError>;

    /// Records one execution of the job and returns its request identifier.
    async fn create_request(
        &self,
        request: &RunRequest,
        metadata: &Value,
        cancel: &CancellationToken,
    ) -> Result<String, PersistenceError>;

    /// Records that a stage exists at `path`.
    async fn create_stage(
        &self,
        path: &StagePath,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<(), PersistenceError>;

    /// Records a stage status transition.
    async fn set_status(
        &self,
        path: &StagePath,
        status: StageStatus,
        cancel: &CancellationToken,
    ) -> Result<(), PersistenceError>;

    /// Persists a stage result produced by this run.
    async fn save_result(
        &self,
        path: &StagePath,
        result: &Value,
        cancel: &CancellationToken,
    ) -> Result<(), PersistenceError>;

    /// Fetches the result produced for `path` during this run, if any.
    async fn get_current_result(
        &self,
        path: &StagePath,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, PersistenceError>;

    /// Fetches the result persisted for `path` by an earlier run, if any.
    async fn get_previous_result(
        &self,
        path: &StagePath,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, PersistenceError>;
}
