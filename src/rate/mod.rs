//! Pacing module
//!
//! Randomized polling delays and error backoff for the bot loops.

mod pacing;

pub use pacing::{Pacing, backoff_with_jitter, random_delay};
