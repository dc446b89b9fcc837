//! Job orchestration kernel.
//!
//! The kernel drives one job run end to end: it validates the run request,
//! resolves job and request identity through the data layer, builds and
//! persists the static stage tree, then walks the tree depth first. At each
//! node it decides between fresh execution, bypass and disable, lets the
//! stage fan out dynamic children from its resolved result, and recurses
//! into the children under the stage's sibling concurrency window.
//!
//! A fault or cancellation in one branch stops that branch and its
//! descendants only; sibling branches proceed. A job instance may run
//! exactly once.


use crate::builder::StageBuilder;
use crate::cancellation::CancellationToken;
use crate::core::{RunMode, RunRequest, StagePath, StageStatus};
use crate::data::DataLayer;
use crate::errors::StagetreeError;
use crate::logging::{LogLevel, LogSink, NoOpLogSink};
use crate::stage::{Stage, WorkContext};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Window for the best-effort status write after a cancellation.
const CANCEL_STATUS_TIMEOUT: Duration = Duration::from_secs(5);

/// The host-supplied configuration function. Receives the run metadata and
/// returns the root builder describing the static tree.
pub type ConfigureFn = Box<dyn Fn(&Value) -> StageBuilder + Send + Sync>;

/// Orchestrates one job run.
pub struct Kernel {
    name: String,
    version: String,
    configure: ConfigureFn,
    data: Arc<dyn DataLayer>,
    log: Arc<dyn LogSink>,
    stages: Arc<DashMap<StagePath, Arc<Stage>>>,
    root_cancel: Arc<CancellationToken>,
    has_run: AtomicBool,
}

impl Kernel {
    /// Creates a kernel around a data layer and a configuration function.
    /// Logging defaults to a no-op sink; see [`with_logger`](Self::with_logger).
    pub fn new<F>(
        name: impl Into<String>,
        version: impl Into<String>,
        data: Arc<dyn DataLayer>,
        configure: F,
    ) -> Self
    where
        F: Fn(&Value) -> StageBuilder + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            version: version.into(),
            configure: Box::new(configure),
            data,
            log: Arc::new(NoOpLogSink),
            stages: Arc::new(DashMap::new()),
            root_cancel: Arc::new(CancellationToken::new()),
            has_run: AtomicBool::new(false),
        }
    }

    /// Replaces the log sink.
    #[must_use]
    pub fn with_logger(mut self, log: Arc<dyn LogSink>) -> Self {
        self.log = log;
        self
    }

    /// Returns the kernel name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the kernel version handed to the data layer when validating
    /// an existing job.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the top-level cancellation token for this run.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.root_cancel
    }

    /// Returns the materialized stage at `path`, if any.
    #[must_use]
    pub fn stage(&self, path: &StagePath) -> Option<Arc<Stage>> {
        self.stages.get(path).map(|entry| entry.value().clone())
    }

    /// Returns every materialized path, in path order.
    #[must_use]
    pub fn stage_paths(&self) -> Vec<StagePath> {
        let mut paths: Vec<StagePath> = self.stages.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }

    /// Cancels the whole run. Every materialized stage's token is linked to
    /// the top-level token and cascades.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.root_cancel.cancel(reason);
    }

    /// Cancels the stage at `path` and, through linked tokens, every
    /// currently materialized descendant. Dynamic descendants that do not
    /// exist yet are never created, since their parent observes the signal
    /// before creating children.
    pub fn cancel_path(&self, path: &StagePath, reason: &str) {
        if path.is_empty() || *path == StagePath::root() {
            self.root_cancel.cancel(reason);
            return;
        }
        if let Some(stage) = self.stage(path) {
            stage.cancel(reason);
            return;
        }
        // Path not materialized; reach any descendants that already exist.
        for entry in self.stages.iter() {
            if entry.key().is_descendant_of(path) {
                entry.value().cancel(reason);
            }
        }
    }

    /// Runs the job described by `request`.
    ///
    /// Branch-level faults and cancellations are contained and logged; they
    /// do not surface here. Top-level cancellation logs a warning and
    /// returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid request, a second `run` call on the
    /// same instance, a failure while resolving job identity, or a fault
    /// while constructing the static tree. All of these abort before any
    /// stage executes.
    pub async fn run(&self, request: RunRequest, metadata: Value) -> Result<(), StagetreeError> {
        if self.has_run.swap(true, Ordering::SeqCst) {
            return Err(StagetreeError::InvalidState(
                "a job instance may run exactly once".to_string(),
            ));
        }

        self.log
            .write(LogLevel::Information, None, &format!("{} started", self.name));

        if let Err(e) = request.validate() {
            self.log
                .write(LogLevel::Error, None, &format!("invalid run request: {e}"));
            return Err(e.into());
        }

        let request = match self.resolve_identity(request, &metadata).await {
            Ok(request) => request,
            Err(e) => {
                self.log.write(
                    LogLevel::Fatal,
                    None,
                    &format!("failed to resolve job identity: {e}"),
                );
                return Err(e);
            }
        };

        if let Err(e) = self.build_static_tree(&metadata).await {
            self.log
                .write(LogLevel::Fatal, None, &format!("{e}"));
            return Err(e);
        }

        if request.mode == RunMode::BuildOnly {
            self.log.write(
                LogLevel::Information,
                None,
                &format!("{} finished (build only)", self.name),
            );
            return Ok(());
        }

        let driver = Arc::new(Driver {
            data: self.data.clone(),
            log: self.log.clone(),
            stages: self.stages.clone(),
            root_cancel: self.root_cancel.clone(),
            request,
            metadata,
        });
        driver.run_stage(StagePath::root(), true).await;

        if self.root_cancel.is_cancelled() {
            self.log
                .write(LogLevel::Warning, None, &format!("{} cancelled", self.name));
        } else {
            self.log
                .write(LogLevel::Information, None, &format!("{} finished", self.name));
        }
        Ok(())
    }

    /// Resolves the job and request identifiers, creating the job when the
    /// data layer has not seen it before.
    async fn resolve_identity(
        &self,
        mut request: RunRequest,
        metadata: &Value,
    ) -> Result<RunRequest, StagetreeError> {
        let cancel = self.root_cancel.as_ref();
        if self.data.is_new_job(&request, cancel).await? {
            let job_id = self.data.create_job(&self.name, &request, cancel).await?;
            request.job_id = Some(job_id);
        } else {
            self.data
                .validate_existing_job(&request, &self.version, cancel)
                .await?;
        }
        let request_id = self.data.create_request(&request, metadata, cancel).await?;
        request.request_id = Some(request_id);
        Ok(request)
    }

    /// Builds the static tree and persists a created record per stage.
    /// Any failure here is fatal; no partial tree is executed.
    async fn build_static_tree(&self, metadata: &Value) -> Result<(), StagetreeError> {
        let builder = (self.configure)(metadata);
        let stages = builder.build(StagePath::root());
        if stages.is_empty() {
            return Err(StagetreeError::Build(
                "the root stage builder produced no stages".to_string(),
            ));
        }
        for (path, stage) in stages {
            self.data
                .create_stage(&path, stage.name(), self.root_cancel.as_ref())
                .await
                .map_err(|e| {
                    StagetreeError::Build(format!(
                        "failed to persist created record for stage {path}: {e}"
                    ))
                })?;
            let stage = Arc::new(stage);
            link_to_ancestor(&self.stages, &self.root_cancel, &stage);
            self.stages.insert(path, stage);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("stages", &self.stages.len())
            .field("cancelled", &self.root_cancel.is_cancelled())
            .finish()
    }
}

/// Links a stage's token to its nearest materialized ancestor's token, so a
/// cancelled ancestor cancels the whole subtree. The root links to the
/// kernel's top-level token.
fn link_to_ancestor(
    stages: &DashMap<StagePath, Arc<Stage>>,
    root_cancel: &Arc<CancellationToken>,
    stage: &Arc<Stage>,
) {
    let mut ancestor = stage.path().parent();
    let mut parent_token = None;
    while let Some(path) = ancestor {
        if let Some(entry) = stages.get(&path) {
            parent_token = Some(entry.value().cancellation().clone());
            break;
        }
        ancestor = path.parent();
    }
    let parent_token = parent_token.unwrap_or_else(|| root_cancel.clone());
    let child_token = stage.cancellation().clone();
    parent_token.on_cancel(move |reason| child_token.cancel(reason));
}

/// How a fresh execution attempt ended.
enum WorkOutcome {
    Completed,
    Faulted,
    Cancelled,
}

/// Shared execution state for one run, cloned into every branch task.
struct Driver {
    data: Arc<dyn DataLayer>,
    log: Arc<dyn LogSink>,
    stages: Arc<DashMap<StagePath, Arc<Stage>>>,
    root_cancel: Arc<CancellationToken>,
    request: RunRequest,
    metadata: Value,
}

impl Driver {
    /// Runs the stage at `path` and recurses into its children.
    ///
    /// `parent_enabled` is the parent's effective enabled state; a false
    /// value disables this whole subtree regardless of each stage's own
    /// flag.
    fn run_stage(self: Arc<Self>, path: StagePath, parent_enabled: bool) -> BoxFuture<'static, ()> {
        async move {
            let Some(stage) = self.stages.get(&path).map(|e| e.value().clone()) else {
                self.log
                    .write(LogLevel::Error, Some(&path), "stage not found in the tree");
                return;
            };

            let effective = parent_enabled && stage.is_enabled();
            if effective && self.meets_run_criteria(&path) {
                match self.execute_work(&stage).await {
                    WorkOutcome::Completed => {}
                    // The branch ends here; siblings are unaffected.
                    WorkOutcome::Faulted | WorkOutcome::Cancelled => return,
                }
            } else if effective {
                self.transition(&stage, StageStatus::Bypassed).await;
            } else {
                self.transition(&stage, StageStatus::Disabled).await;
            }

            if stage.cancellation().is_cancelled() {
                self.log.write(
                    LogLevel::Warning,
                    Some(&path),
                    "cancelled before creating children",
                );
                return;
            }
            self.materialize_children(&stage).await;

            if stage.cancellation().is_cancelled() {
                return;
            }
            self.run_children(&stage, effective).await;
        }
        .boxed()
    }

    /// Decides whether `path` executes fresh this run.
    fn meets_run_criteria(&self, path: &StagePath) -> bool {
        match self.request.mode {
            RunMode::Standard => true,
            RunMode::From => {
                *path == self.request.target || path.is_descendant_of(&self.request.target)
            }
            RunMode::Single => *path == self.request.target,
            RunMode::BuildOnly => false,
        }
    }

    /// Runs the work closure with cancellation checks at every boundary.
    async fn execute_work(&self, stage: &Arc<Stage>) -> WorkOutcome {
        let path = stage.path();
        let cancel = stage.cancellation();

        if cancel.is_cancelled() {
            return self.finish_cancelled(stage).await;
        }
        self.transition(stage, StageStatus::Running).await;
        if cancel.is_cancelled() {
            return self.finish_cancelled(stage).await;
        }

        let result = match stage.work() {
            Some(work) => {
                let ctx = WorkContext {
                    path: path.clone(),
                    name: stage.name().to_string(),
                    run: self.request.clone(),
                    metadata: self.metadata.clone(),
                    cancel: cancel.clone(),
                };
                match AssertUnwindSafe(work(ctx)).catch_unwind().await {
                    Ok(Ok(result)) => result,
                    Ok(Err(fault)) => {
                        if cancel.is_cancelled() {
                            return self.finish_cancelled(stage).await;
                        }
                        self.log.write(
                            LogLevel::Error,
                            Some(path),
                            &format!("stage {stage} faulted: {fault:#}"),
                        );
                        self.transition(stage, StageStatus::Errored).await;
                        return WorkOutcome::Faulted;
                    }
                    Err(_panic) => {
                        self.log.write(
                            LogLevel::Error,
                            Some(path),
                            &format!("stage {stage} panicked"),
                        );
                        self.transition(stage, StageStatus::Errored).await;
                        return WorkOutcome::Faulted;
                    }
                }
            }
            None => None,
        };

        if cancel.is_cancelled() {
            return self.finish_cancelled(stage).await;
        }
        if let Some(value) = result {
            // A lost write is logged; the completed work stands.
            if let Err(e) = self.data.save_result(path, &value, cancel).await {
                self.log.write(
                    LogLevel::Error,
                    Some(path),
                    &format!("failed to save result: {e}"),
                );
            }
        }
        if cancel.is_cancelled() {
            return self.finish_cancelled(stage).await;
        }
        self.transition(stage, StageStatus::Completed).await;
        WorkOutcome::Completed
    }

    /// Records a cancelled stage with one bounded-time write attempt.
    async fn finish_cancelled(&self, stage: &Arc<Stage>) -> WorkOutcome {
        let path = stage.path();
        let reason = stage
            .cancellation()
            .reason()
            .unwrap_or_else(|| "cancelled".to_string());
        self.log.write(
            LogLevel::Warning,
            Some(path),
            &format!("stage {stage} was cancelled: {reason}"),
        );
        if stage.transition_to(StageStatus::Cancelled) {
            let write = self
                .data
                .set_status(path, StageStatus::Cancelled, stage.cancellation());
            match tokio::time::timeout(CANCEL_STATUS_TIMEOUT, write).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.log.write(
                    LogLevel::Error,
                    Some(path),
                    &format!("failed to record cancelled status: {e}"),
                ),
                Err(_) => self.log.write(
                    LogLevel::Error,
                    Some(path),
                    "timed out recording cancelled status",
                ),
            }
        }
        WorkOutcome::Cancelled
    }

    /// Applies and persists a status transition.
    async fn transition(&self, stage: &Arc<Stage>, status: StageStatus) {
        let path = stage.path();
        if !stage.transition_to(status) {
            self.log.write(
                LogLevel::Warning,
                Some(path),
                &format!("illegal transition to {status} ignored"),
            );
            return;
        }
        self.log.write(
            LogLevel::Information,
            Some(path),
            &format!("{} {status}", stage.name()),
        );
        if let Err(e) = self
            .data
            .set_status(path, status, stage.cancellation())
            .await
        {
            self.log.write(
                LogLevel::Error,
                Some(path),
                &format!("failed to record status {status}: {e}"),
            );
        }
    }

    /// Selects between this run's result and a prior run's for `path`.
    async fn resolve_result(
        &self,
        path: &StagePath,
        cancel: &CancellationToken,
    ) -> Result<Option<Value>, crate::errors::PersistenceError> {
        let target = &self.request.target;
        let use_current = match self.request.mode {
            RunMode::Standard | RunMode::BuildOnly => true,
            // The target and its descendants ran fresh; ancestors are the
            // propagation path down to the target.
            RunMode::From => {
                path == target
                    || path.is_descendant_of(target)
                    || path.is_ancestor_of(target)
            }
            RunMode::Single => path == target,
        };
        if use_current {
            self.data.get_current_result(path, cancel).await
        } else {
            self.data.get_previous_result(path, cancel).await
        }
    }

    /// Invokes the stage's child factory, if any, and persists the dynamic
    /// stages it declares. A failed created record skips that child's whole
    /// subtree and leaves siblings alone.
    async fn materialize_children(&self, stage: &Arc<Stage>) {
        let Some(factory) = stage.child_factory().cloned() else {
            return;
        };
        let path = stage.path();

        let result = match self.resolve_result(path, stage.cancellation()).await {
            Ok(result) => result,
            Err(e) => {
                self.log.write(
                    LogLevel::Error,
                    Some(path),
                    &format!("failed to fetch result for child creation: {e}"),
                );
                None
            }
        };

        let mut builder = StageBuilder::new();
        factory(&mut builder, result.as_ref());

        let next_index = u32::try_from(self.child_count(path) + 1).unwrap_or(u32::MAX);
        let mut skipped: Vec<StagePath> = Vec::new();
        for (child_path, child) in builder.build_children(path, next_index) {
            if skipped.iter().any(|p| p.is_ancestor_of(&child_path)) {
                continue;
            }
            match self
                .data
                .create_stage(&child_path, child.name(), stage.cancellation())
                .await
            {
                Ok(()) => {
                    let child = Arc::new(child);
                    link_to_ancestor(&self.stages, &self.root_cancel, &child);
                    self.stages.insert(child_path, child);
                }
                Err(e) => {
                    self.log.write(
                        LogLevel::Error,
                        Some(&child_path),
                        &format!("failed to persist created record: {e}"),
                    );
                    skipped.push(child_path);
                }
            }
        }
    }

    fn child_count(&self, path: &StagePath) -> usize {
        self.stages
            .iter()
            .filter(|entry| path.is_parent_of(entry.key()))
            .count()
    }

    /// Recurses into the stage's children under its concurrency window.
    ///
    /// Launch follows sibling order. With a window of 1 each child's whole
    /// subtree finishes before the next sibling starts; with a window of 0
    /// every child branch runs concurrently; otherwise at most N branches
    /// are in flight and a finished branch frees the slot for the next.
    async fn run_children(self: &Arc<Self>, stage: &Arc<Stage>, effective_enabled: bool) {
        let path = stage.path();
        let mut children: Vec<StagePath> = self
            .stages
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| path.is_parent_of(key))
            .collect();
        children.sort();
        if children.is_empty() {
            return;
        }

        let window = stage.max_parallel_children();
        if window == 1 {
            for child in children {
                self.clone().run_stage(child, effective_enabled).await;
            }
            return;
        }

        let semaphore = (window > 0).then(|| Arc::new(Semaphore::new(window)));
        let mut handles = Vec::with_capacity(children.len());
        for child in children {
            let permit = match &semaphore {
                Some(semaphore) => match semaphore.clone().acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
                None => None,
            };
            let driver = self.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                driver.run_stage(child, effective_enabled).await;
            }));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                self.log.write(
                    LogLevel::Fatal,
                    Some(path),
                    &format!("child branch terminated abnormally: {e}"),
                );
            }
        }
    }
}
