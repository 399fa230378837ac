//! Replica liveness: the applied-seqn pulse and garbage collection.

pub mod gc;
pub mod pulse;

pub use gc::{run_cleaner, run_reaper, SESSION_GLOB};
pub use pulse::{applied_path, run as run_pulse};
