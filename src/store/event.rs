//! Applied-mutation events.
//!
//! Every consumed seqn produces exactly one event. The event carries an
//! immutable snapshot of the tree as of that seqn, so a watcher can read
//! any path at the moment of the change without racing later applies.

use std::sync::Arc;

use crate::core::error::ConcordError;
use crate::store::mutation::{Cas, NOP};
use crate::store::node::Node;

/// The record of one applied mutation.
#[derive(Debug, Clone)]
pub struct Event {
    /// Position in the global mutation log.
    pub seqn: u64,
    /// Path the mutation addressed (`"/"` for no-ops, empty when the
    /// mutation could not even be decoded).
    pub path: String,
    /// New body for sets; empty otherwise.
    pub body: String,
    /// Resulting CAS for the path, or its prior CAS when `err` is set.
    pub cas: Cas,
    /// The encoded mutation that produced this event.
    pub mutation: String,
    /// Application-level rejection, if any. The seqn is consumed
    /// regardless.
    pub err: Option<ConcordError>,
    /// Tree contents as of this seqn.
    pub snapshot: Arc<Node>,
}

impl Event {
    /// True iff this event set a path.
    pub fn is_set(&self) -> bool {
        self.err.is_none() && matches!(self.cas, Cas::At(_))
    }

    /// True iff this event deleted a path.
    pub fn is_del(&self) -> bool {
        self.err.is_none() && self.cas == Cas::Missing && !self.is_nop()
    }

    /// True iff this event was a no-op.
    pub fn is_nop(&self) -> bool {
        self.mutation == NOP
    }

    /// Short description for logging.
    pub fn desc(&self) -> &'static str {
        if self.err.is_some() {
            "rejected"
        } else if self.is_nop() {
            "nop"
        } else if self.is_set() {
            "set"
        } else {
            "del"
        }
    }
}
