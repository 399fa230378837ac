//! Replicated agreement on a totally ordered mutation log.
//!
//! Every mutation is decided by one consensus slot. Per-slot state lives
//! in [`instance`]; [`manager`] allocates slots, keeps the pipelining
//! window, and restores seqn order before anything reaches the store.
//! Round numbers are partitioned across the cluster so proposers never
//! collide on a round (see [`proposer`]).

pub mod acceptor;
pub mod cluster;
pub mod instance;
pub mod learner;
pub mod manager;
pub mod message;
pub mod proposer;

use async_trait::async_trait;

use crate::core::error::ConcordResult;
use crate::store::mutation::{encode_del, encode_set, Cas};
use crate::store::Event;

pub use cluster::{Cluster, Member};
pub use manager::ManagerHandle;
pub use message::{Body, Msg, Packet};

/// The proposal surface of a replica.
///
/// `propose` returns once the mutation has been decided by the cluster
/// and applied locally. The returned event carries the assigned seqn and,
/// for refused writes, the reason and the path's current cas token.
#[async_trait]
pub trait Proposer: Send + Sync {
    async fn propose(&self, value: String) -> ConcordResult<Event>;
}

/// Write `body` at `path`, guarded by `cas`. A refused write surfaces as
/// an error even though it consumed a slot.
pub async fn set<P>(p: &P, path: &str, body: &str, cas: Cas) -> ConcordResult<Event>
where
    P: Proposer + ?Sized,
{
    let ev = p.propose(encode_set(path, body, cas)?).await?;
    match ev.err {
        Some(err) => Err(err),
        None => Ok(ev),
    }
}

/// Delete `path`, guarded by `cas`.
pub async fn del<P>(p: &P, path: &str, cas: Cas) -> ConcordResult<Event>
where
    P: Proposer + ?Sized,
{
    let ev = p.propose(encode_del(path, cas)?).await?;
    match ev.err {
        Some(err) => Err(err),
        None => Ok(ev),
    }
}
