#![forbid(unsafe_code)]

//! replica_sync (replsync): periodic one-way mirror of a source directory
//! tree into a replica, with an append-only log of every action.
//!
//! Each tick:
//! 1. **Reconcile**: walk the source, create or refresh what the replica is
//!    missing, then prune what the source no longer has
//! 2. **Log**: every decision becomes one line in the action log
//! 3. **Wait**: sleep the configured interval (fixed delay) and repeat
//!
//! # Library usage
//!
//! ```rust,no_run
//! use replica_sync::prelude::*;
//! use std::path::Path;
//!
//! let report = Reconciler::default().reconcile(Path::new("/data/src"), Path::new("/backup/src"));
//! for action in &report.actions {
//!     println!("{action}");
//! }
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use replica_sync::core::config::Config;
//! use replica_sync::mirror::comparator::needs_copy;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod mirror;
