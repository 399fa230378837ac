//! Concord - replicated coordination store.
//!
//! Concord is a single-binary coordination service: a small hierarchical
//! key-value store replicated across a static cluster by multi-instance
//! consensus. Every write is a mutation string decided into exactly one
//! slot of a totally ordered log; each replica journals and applies the
//! log in seqn order, so all replicas hold the same tree. Writes carry a
//! compare-and-set token, reads and glob watches are served locally.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Proposal Surface                         │
//! │           set / del (cas-guarded) │ pulse │ session reaper      │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Consensus Manager                          │
//! │    slot allocation │ pipelining window │ no-op fill │ reorder   │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Per-Slot Instances                           │
//! │          proposer │ acceptor │ learner │ learn sink             │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Ack Transport (UDP)                          │
//! │        sequence framing │ retransmit │ dedup │ give-up          │
//! └─────────────────────────────────────────────────────────────────┘
//!
//!          decisions, in seqn order
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Journal → Store (single writer)                │
//! │   checksummed append │ path tree │ cas │ watches │ event log    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Replica runtime orchestration
//! - [`core::error`] - Error types
//!
//! ## Consensus
//! - [`paxos::manager`] - Slot allocation, ordering, pipelining window
//! - [`paxos::instance`] - Per-slot agreement task
//! - [`paxos::proposer`] - Phase 1/2 coordinator with partitioned rounds
//! - [`paxos::acceptor`] - Promise/accept record
//! - [`paxos::learner`] - Vote counting and the learn shortcut
//! - [`paxos::cluster`] - Static membership and message routing
//!
//! ## Store
//! - [`store::store`] - Applied state, watches, waits, event log
//! - [`store::node`] - Immutable copy-on-write path tree
//! - [`store::mutation`] - Mutation encoding and cas tokens
//! - [`store::glob`] - Path glob matching
//!
//! ## Durability
//! - [`journal`] - Checksummed mutation journal and replay
//!
//! ## Networking
//! - [`net::ack`] - Ack/retransmit framing
//! - [`net::datagram`] - Socket abstraction and in-memory test net
//!
//! ## Liveness
//! - [`life::pulse`] - Applied-seqn heartbeat
//! - [`life::gc`] - Event log cleaning and session reaping
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations
//!
//! # Key Invariants
//!
//! - Exactly one mutation is decided per slot, cluster-wide
//! - The store applies seqns contiguously; a gap or repeat stops the replica
//! - A cas-refused mutation still consumes its slot
//! - Round numbers are partitioned by proposer, so rounds never collide

pub mod cli;
pub mod core;
pub mod journal;
pub mod life;
pub mod net;
pub mod paxos;
pub mod store;

pub use crate::core::config::Config;
pub use crate::core::error::{ConcordError, ConcordResult};
pub use crate::core::runtime::Runtime;
pub use crate::paxos::Proposer;
pub use crate::store::{Cas, Event, Store};
