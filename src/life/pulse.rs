//! Liveness pulse.
//!
//! Each replica periodically publishes its applied seqn at
//! `/ctl/node/<id>/applied`, guarded by the cas token of its own last
//! pulse. Peers use these files to compute the cluster-wide applied
//! floor for log cleaning, and their absence marks a dead node.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::core::error::ConcordError;
use crate::paxos::{self, Proposer};
use crate::store::Store;

pub fn applied_path(id: &str) -> String {
    format!("/ctl/node/{id}/applied")
}

/// Runs until `shutdown` flips. One pulse per interval; a lost race on
/// the cas token adopts the current token and carries on.
pub async fn run(
    proposer: Arc<dyn Proposer>,
    store: Store,
    self_id: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let path = applied_path(&self_id);
    let mut cas = store.get(&path).1;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                debug!(%path, "pulse stopped");
                return;
            }
        }
        let body = store.seqn().to_string();
        match paxos::set(proposer.as_ref(), &path, &body, cas).await {
            Ok(ev) => cas = ev.cas,
            Err(ConcordError::CasMismatch { current, .. }) => {
                // Someone rewrote our file (say, after a restart elsewhere
                // replayed an old pulse). Take the token and retry next tick.
                warn!(%path, %current, "pulse lost a cas race");
                cas = current;
            }
            Err(err) if err.is_retriable() => warn!(%path, %err, "pulse not decided"),
            Err(err) => {
                warn!(%path, %err, "pulse stopped on error");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applied_path_format() {
        assert_eq!(applied_path("n1"), "/ctl/node/n1/applied");
    }
}
