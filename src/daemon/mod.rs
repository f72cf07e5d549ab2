//! Service side: the scheduler loop and its stop/sync signal handle.

pub mod loop_main;
pub mod signals;
