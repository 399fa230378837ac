//! A running consensus instance for one slot.
//!
//! Each instance is a task owning the acceptor, proposer and learner state
//! for its seqn. Messages flow in through an unbounded channel and replies
//! go out through the cluster; the task ends once the slot decides.

use std::time::Duration;

use rand::Rng;
use tokio::sync::mpsc;
use tracing::trace;

use crate::paxos::acceptor::Acceptor;
use crate::paxos::cluster::Cluster;
use crate::paxos::learner::{Learner, Sink};
use crate::paxos::message::{Body, Msg, Packet};
use crate::paxos::proposer::Proposer;

/// Base retry delay when another proposer is competing for the slot.
const BACKOFF_BASE: Duration = Duration::from_millis(100);
/// Ceiling for the doubling backoff.
const BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Handle to a spawned instance task.
#[derive(Debug, Clone)]
pub struct Instance {
    seqn: u64,
    tx: mpsc::UnboundedSender<Packet>,
}

impl Instance {
    /// Spawns the instance task for `seqn`. A decision is reported exactly
    /// once on `decided_tx`.
    pub fn spawn(
        seqn: u64,
        cluster: Cluster,
        decided_tx: mpsc::UnboundedSender<(u64, String)>,
    ) -> Instance {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Instance {
            seqn,
            tx: tx.clone(),
        };
        tokio::spawn(run(seqn, cluster, rx, tx, decided_tx));
        handle
    }

    /// Delivers an inbound packet. Packets for a decided (finished)
    /// instance are dropped.
    pub fn deliver(&self, pkt: Packet) {
        let _ = self.tx.send(pkt);
    }

    /// Asks the local proposer to begin agreement on `value`.
    pub fn propose(&self, self_addr: std::net::SocketAddr, value: String) {
        let _ = self.tx.send(Packet {
            msg: Msg::new(self.seqn, Body::Propose { value }),
            from: self_addr,
        });
    }
}

async fn run(
    seqn: u64,
    cluster: Cluster,
    mut rx: mpsc::UnboundedReceiver<Packet>,
    tx: mpsc::UnboundedSender<Packet>,
    decided_tx: mpsc::UnboundedSender<(u64, String)>,
) {
    let mut acceptor = Acceptor::new();
    let mut proposer = Proposer::new(cluster.self_index(), cluster.len(), cluster.quorum());
    let mut learner = Learner::new(cluster.quorum());
    let mut sink = Sink::new();

    let self_addr = cluster.members()[cluster.self_index()].addr;
    let mut backoff = BACKOFF_BASE;
    let mut tick_armed = false;

    while let Some(pkt) = rx.recv().await {
        let Some(from) = cluster.index_of_addr(pkt.from) else {
            trace!(seqn, from = %pkt.from, "packet from unknown address dropped");
            continue;
        };
        let body = pkt.msg.body;
        trace!(seqn, from, ?body, "instance recv");

        if matches!(body, Body::Tick) {
            tick_armed = false;
        }

        if let Some(reply) = acceptor.update(&body) {
            cluster.broadcast(&Msg::new(seqn, reply));
        }
        if let Some(reply) = proposer.update(from, &body) {
            cluster.broadcast(&Msg::new(seqn, reply));
        }

        let decided = learner
            .update(from, &body)
            .or_else(|| sink.update(&body));
        if let Some(value) = decided {
            cluster.broadcast(&Msg::new(seqn, Body::Learn { value: value.clone() }));
            let _ = decided_tx.send((seqn, value));
            return;
        }

        // Competition shows up as higher rounds in promises. Re-prepare
        // after a randomized, doubling delay so one proposer wins.
        if proposer.is_contended() && !tick_armed {
            tick_armed = true;
            let delay = backoff + Duration::from_millis(rand::thread_rng().gen_range(0..100));
            backoff = (backoff * 2).min(BACKOFF_MAX);
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Packet {
                    msg: Msg::new(seqn, Body::Tick),
                    from: self_addr,
                });
            });
        }
    }
}
