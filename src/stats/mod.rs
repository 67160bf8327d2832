//! Statistics module
//!
//! Lock-free counters tracked per bot task.

mod atomic;

pub use atomic::{TaskStats, TaskStatsSnapshot};
