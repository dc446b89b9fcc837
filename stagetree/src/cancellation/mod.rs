//! Cooperative cancellation for stage trees.
//!
//! Every stage owns a token linked to its parent's token, so cancelling a
//! path cancels the whole subtree below it without touching completed
//! ancestors.

mod token;

pub use token::{CancellationToken, OperationCancelled};
