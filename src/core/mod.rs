//! Core infrastructure: configuration, errors, runtime orchestration.

pub mod config;
pub mod error;
pub mod runtime;

pub use config::Config;
pub use error::{ConcordError, ConcordResult};
pub use runtime::Runtime;
