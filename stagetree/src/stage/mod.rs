//! Stage configuration and runtime state.
//!
//! A stage is one node of the job tree: a unit of work plus an optional
//! factory for dynamic children. Configuration is closure-based; there is no
//! trait hierarchy to implement.

use crate::builder::StageBuilder;
use crate::cancellation::CancellationToken;
use crate::core::{RunRequest, StagePath, StageStatus};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// The boxed future a work closure produces.
pub type WorkFuture = BoxFuture<'static, anyhow::Result<Option<Value>>>;

/// A stage's work closure.
///
/// Returns `Ok(Some(value))` to persist a result, `Ok(None)` for void work,
/// and `Err` to fault the branch.
pub type WorkFn = Arc<dyn Fn(WorkContext) -> WorkFuture + Send + Sync>;

/// A stage's child factory.
///
/// Invoked after the stage settles, with the stage's resolved result; adds
/// child declarations to the supplied builder.
pub type ChildFactoryFn = Arc<dyn Fn(&mut StageBuilder, Option<&Value>) + Send + Sync>;

/// Everything a work closure gets to see.
#[derive(Clone)]
pub struct WorkContext {
    /// The executing stage's path.
    pub path: StagePath,
    /// The executing stage's name.
    pub name: String,
    /// The resolved run request, read-only.
    pub run: RunRequest,
    /// Host-supplied run metadata.
    pub metadata: Value,
    /// The stage's cancellation token.
    pub cancel: Arc<CancellationToken>,
}

impl WorkContext {
    /// Bails out of the closure if cancellation has been requested.
    ///
    /// # Errors
    ///
    /// Returns [`crate::cancellation::OperationCancelled`] once cancelled,
    /// which composes with `?` under `anyhow`.
    pub fn checkpoint(&self) -> Result<(), crate::cancellation::OperationCancelled> {
        self.cancel.check()
    }
}

impl fmt::Debug for WorkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkContext")
            .field("path", &self.path)
            .field("name", &self.name)
            .field("run", &self.run)
            .finish()
    }
}

/// Declarative configuration of a single stage.
pub struct StageConfig {
    pub(crate) name: String,
    pub(crate) enabled: bool,
    pub(crate) max_parallel_children: usize,
    pub(crate) work: Option<WorkFn>,
    pub(crate) create_children: Option<ChildFactoryFn>,
}

impl StageConfig {
    /// Creates a configuration with defaults: enabled, serial children,
    /// no work, no child factory.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            max_parallel_children: 1,
            work: None,
            create_children: None,
        }
    }

    /// Sets the enabled flag. A disabled stage forces every descendant's
    /// effective state to disabled.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the sibling concurrency window for this stage's children.
    ///
    /// 0 runs all children concurrently, 1 runs them one at a time and
    /// N > 1 keeps at most N branches in flight.
    #[must_use]
    pub fn max_parallel_children(mut self, window: usize) -> Self {
        self.max_parallel_children = window;
        self
    }

    /// Sets the work closure.
    #[must_use]
    pub fn work<F, Fut>(mut self, work: F) -> Self
    where
        F: Fn(WorkContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Option<Value>>> + Send + 'static,
    {
        self.work = Some(Arc::new(move |ctx| work(ctx).boxed()));
        self
    }

    /// Sets the child factory, called with the stage's resolved result once
    /// the stage settles.
    #[must_use]
    pub fn create_children<F>(mut self, factory: F) -> Self
    where
        F: Fn(&mut StageBuilder, Option<&Value>) + Send + Sync + 'static,
    {
        self.create_children = Some(Arc::new(factory));
        self
    }
}

impl fmt::Debug for StageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageConfig")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("max_parallel_children", &self.max_parallel_children)
            .field("has_work", &self.work.is_some())
            .field("has_child_factory", &self.create_children.is_some())
            .finish()
    }
}

/// A materialized stage.
///
/// Stage state is mutated only by the single branch executing it; other
/// branches may read the status and cancel the token.
pub struct Stage {
    path: StagePath,
    config: StageConfig,
    status: RwLock<StageStatus>,
    cancel: Arc<CancellationToken>,
}

impl Stage {
    pub(crate) fn new(path: StagePath, config: StageConfig) -> Self {
        Self {
            path,
            config,
            status: RwLock::new(StageStatus::None),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Returns the stage's path.
    #[must_use]
    pub fn path(&self) -> &StagePath {
        &self.path
    }

    /// Returns the stage's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns the stage's own enabled flag. The effective state also
    /// depends on every ancestor's flag.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Returns the sibling concurrency window for this stage's children.
    #[must_use]
    pub fn max_parallel_children(&self) -> usize {
        self.config.max_parallel_children
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        *self.status.read()
    }

    /// Returns the stage's cancellation token.
    #[must_use]
    pub fn cancellation(&self) -> &Arc<CancellationToken> {
        &self.cancel
    }

    /// Cancels this stage and, through linked tokens, its subtree.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancel.cancel(reason);
    }

    /// Applies a status transition if the state machine allows it.
    /// Returns false for an illegal transition, leaving the status as is.
    pub(crate) fn transition_to(&self, next: StageStatus) -> bool {
        let mut status = self.status.write();
        if !status.can_transition_to(next) {
            return false;
        }
        *status = next;
        true
    }

    pub(crate) fn work(&self) -> Option<&WorkFn> {
        self.config.work.as_ref()
    }

    pub(crate) fn child_factory(&self) -> Option<&ChildFactoryFn> {
        self.config.create_children.as_ref()
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("path", &self.path)
            .field("name", &self.config.name)
            .field("status", &self.status())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.path, self.config.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = StageConfig::new("extract");
        assert_eq!(config.name, "extract");
        assert!(config.enabled);
        assert_eq!(config.max_parallel_children, 1);
        assert!(config.work.is_none());
        assert!(config.create_children.is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = StageConfig::new("load")
            .enabled(false)
            .max_parallel_children(0)
            .work(|_ctx| async { Ok(None) })
            .create_children(|_builder, _result| {});

        assert!(!config.enabled);
        assert_eq!(config.max_parallel_children, 0);
        assert!(config.work.is_some());
        assert!(config.create_children.is_some());
    }

    #[test]
    fn test_stage_starts_in_none() {
        let stage = Stage::new(StagePath::root(), StageConfig::new("root"));
        assert_eq!(stage.status(), StageStatus::None);
        assert!(!stage.cancellation().is_cancelled());
    }

    #[test]
    fn test_stage_transition_guard() {
        let stage = Stage::new(StagePath::root(), StageConfig::new("root"));

        assert!(stage.transition_to(StageStatus::Running));
        assert_eq!(stage.status(), StageStatus::Running);

        // Running cannot go back to bypassed.
        assert!(!stage.transition_to(StageStatus::Bypassed));
        assert_eq!(stage.status(), StageStatus::Running);

        assert!(stage.transition_to(StageStatus::Completed));
        assert!(!stage.transition_to(StageStatus::Errored));
        assert_eq!(stage.status(), StageStatus::Completed);
    }

    #[test]
    fn test_stage_display() {
        let path = StagePath::parse("1-2").unwrap();
        let stage = Stage::new(path, StageConfig::new("transform"));
        assert_eq!(stage.to_string(), "1-2 - transform");
    }

    #[tokio::test]
    async fn test_work_closure_runs() {
        let config = StageConfig::new("worker").work(|ctx| async move {
            ctx.checkpoint()?;
            Ok(Some(serde_json::json!({ "stage": ctx.name })))
        });
        let stage = Stage::new(StagePath::root(), config);

        let ctx = WorkContext {
            path: stage.path().clone(),
            name: stage.name().to_string(),
            run: RunRequest::standard(),
            metadata: Value::Null,
            cancel: stage.cancellation().clone(),
        };

        let work = stage.work().cloned().unwrap();
        let result = work(ctx).await.unwrap();
        assert_eq!(result, Some(serde_json::json!({ "stage": "worker" })));
    }

    #[tokio::test]
    async fn test_work_closure_observes_cancellation() {
        let config = StageConfig::new("worker").work(|ctx| async move {
            ctx.checkpoint()?;
            Ok(None)
        });
        let stage = Stage::new(StagePath::root(), config);
        stage.cancel("test stop");

        let ctx = WorkContext {
            path: stage.path().clone(),
            name: stage.name().to_string(),
            run: RunRequest::standard(),
            metadata: Value::Null,
            cancel: stage.cancellation().clone(),
        };

        let work = stage.work().cloned().unwrap();
        let err = work(ctx).await.unwrap_err();
        assert!(err.to_string().contains("test stop"));
    }
}
