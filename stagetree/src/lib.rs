//! # Stagetree
//!
//! A stage-tree orchestration engine for hierarchical, resumable,
//! partially-parallel batch jobs.
//!
//! A job is a tree of *stages*. Each stage performs work, may persist a
//! typed result, and may fan out child stages dynamically, often from its
//! own result. Runs can execute the whole tree fresh, resume from a path,
//! re-run a single path against cached upstream results, or just build and
//! persist the tree:
//!
//! - **Stage addressing**: every stage lives at a [`core::StagePath`] such
//!   as `1-2-3`, with a total order that puts parents before children
//! - **Run modes**: Standard, From, Single and BuildOnly selection rules
//!   decide which stages execute fresh and which replay cached results
//! - **Declarative trees**: a recursive [`builder::StageBuilder`] assigns
//!   deterministic sibling positions
//! - **Bounded parallelism**: each stage caps how many of its child
//!   branches run at once
//! - **Cooperative cancellation**: linked per-stage tokens cascade down a
//!   subtree without disturbing completed ancestors
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagetree::prelude::*;
//! use std::sync::Arc;
//!
//! let data = Arc::new(InMemoryDataLayer::new());
//! let kernel = Kernel::new("nightly-import", "1.0", data, |_metadata| {
//!     let mut root = StageBuilder::new();
//!     root.configure(|_path| {
//!         StageConfig::new("import")
//!             .max_parallel_children(4)
//!             .work(|ctx| async move {
//!                 ctx.checkpoint()?;
//!                 Ok(Some(serde_json::json!({ "batches": 12 })))
//!             })
//!     });
//!     root
//! });
//!
//! kernel.run(RunRequest::standard(), serde_json::Value::Null).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod builder;
pub mod cancellation;
pub mod core;
pub mod data;
pub mod errors;
pub mod kernel;
pub mod logging;
pub mod stage;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::builder::StageBuilder;
    pub use crate::cancellation::{CancellationToken, OperationCancelled};
    pub use crate::core::{RunMode, RunRequest, StagePath, StageStatus};
    pub use crate::data::{DataAction, DataLayer, InMemoryDataLayer, JobRecord};
    pub use crate::errors::{
        FormatError, PersistenceError, StagetreeError, ValidationError,
    };
    pub use crate::kernel::Kernel;
    pub use crate::logging::{
        CollectingLogSink, LogEntry, LogLevel, LogSink, NoOpLogSink, TracingLogSink,
    };
    pub use crate::stage::{Stage, StageConfig, WorkContext};
}
