//! Mirroring engine: tree traversal, staleness checks, reconciliation passes.

pub mod action;
pub mod comparator;
pub mod reconcile;
pub mod walker;
