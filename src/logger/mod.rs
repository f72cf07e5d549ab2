//! Action log: line writer with graceful degradation, plus the sinks the scheduler reports to.

pub mod line;
pub mod sink;
