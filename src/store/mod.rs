//! The hierarchical, versioned key-value store.
//!
//! - [`mutation`] - mutation wire format and CAS tokens
//! - [`node`] - the immutable path tree
//! - [`glob`] - watch patterns
//! - [`event`] - applied-mutation events
//! - [`store`] - the ordered apply loop, watches, and waits

pub mod event;
pub mod glob;
pub mod mutation;
pub mod node;
#[allow(clippy::module_inception)]
pub mod store;

pub use event::Event;
pub use glob::Glob;
pub use mutation::{check_path, encode_del, encode_set, Cas, Mutation, NOP};
pub use node::{walk, Node};
pub use store::Store;
