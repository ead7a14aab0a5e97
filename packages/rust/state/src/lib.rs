//! Recursion state for lineage runs.
//!
//! [`RecursionStateManager`] exclusively owns the frontier of papers to
//! visit, the permanent visited set, and the in-flight bookkeeping between
//! them. Every mutation is serialized behind one async mutex and followed by
//! an atomic write of the state file, so a crash leaves the last complete
//! snapshot on disk for `resume`.

mod manager;
mod persist;

pub use manager::{FrontierEntry, RecursionStateManager, StateSnapshot, VisitedEntry};
pub use persist::STATE_FILE_NAME;
