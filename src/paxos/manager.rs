//! Consensus manager: slot allocation, instance lifecycle, ordering.
//!
//! One manager task per replica. It routes inbound packets to per-slot
//! instances, claims slots for local proposals inside the pipelining
//! window, reorders decisions back into seqn order for the apply drain,
//! and answers peers that lag behind with `Learn` shortcuts out of the
//! store's retained log.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::core::error::{ConcordError, ConcordResult};
use crate::paxos::cluster::Cluster;
use crate::paxos::instance::Instance;
use crate::paxos::message::{Body, Msg, Packet};
use crate::paxos::Proposer;
use crate::store::mutation::NOP;
use crate::store::{Event, Store};

/// How long a decided slot may wait on undecided earlier slots before the
/// gaps are filled with no-ops.
const FILL_DELAY: Duration = Duration::from_millis(500);

enum Cmd {
    /// Claim a slot and start agreement on `value`; replies with the slot.
    Propose {
        value: String,
        reply: oneshot::Sender<u64>,
    },
    /// Propose no-ops on every still-undecided slot below `upto`.
    Fill { upto: u64 },
}

/// Cloneable handle to the manager task; the replica's proposal surface.
#[derive(Clone)]
pub struct ManagerHandle {
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    store: Store,
}

impl ManagerHandle {
    async fn claim(&self, value: String) -> ConcordResult<u64> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Propose { value, reply: tx })
            .map_err(|_| ConcordError::Closed { what: "manager" })?;
        rx.await.map_err(|_| ConcordError::Closed { what: "manager" })
    }
}

#[async_trait]
impl Proposer for ManagerHandle {
    /// Drives `value` to a decided, applied slot. The slot a proposal
    /// lands on may decide someone else's value; in that case the claim is
    /// simply retried on a fresh slot until our value wins one.
    async fn propose(&self, value: String) -> ConcordResult<Event> {
        loop {
            let seqn = self.claim(value.clone()).await?;
            let ev = self
                .store
                .wait(seqn)
                .await
                .map_err(|_| ConcordError::Closed { what: "store" })?;
            if let Some(ConcordError::TooLate { .. }) = ev.err {
                // The slot was applied and cleaned before we observed it;
                // only possible when the slot decided someone else's value.
                continue;
            }
            if ev.mutation == value {
                return Ok(ev);
            }
            trace!(seqn, "slot decided a competing value, retrying");
        }
    }
}

/// Spawns the manager task.
///
/// `applied` is the highest seqn already applied to `store` (from journal
/// replay). Inbound consensus packets arrive on `packet_rx`; decisions
/// leave on `decided_out` in strict seqn order for the apply drain.
pub fn spawn(
    cluster: Cluster,
    store: Store,
    applied: u64,
    alpha: u64,
    packet_rx: mpsc::UnboundedReceiver<Packet>,
    decided_out: mpsc::UnboundedSender<(u64, String)>,
) -> ManagerHandle {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (dec_tx, dec_rx) = mpsc::unbounded_channel();
    let handle = ManagerHandle {
        cmd_tx: cmd_tx.clone(),
        store: store.clone(),
    };
    let m = Manager {
        cluster,
        store,
        applied,
        alpha,
        instances: HashMap::new(),
        claimed: HashSet::new(),
        pending: BTreeMap::new(),
        backlog: VecDeque::new(),
        cmd_tx,
        dec_tx,
        decided_out,
    };
    tokio::spawn(m.run(cmd_rx, packet_rx, dec_rx));
    handle
}

struct Manager {
    cluster: Cluster,
    store: Store,
    /// Highest seqn handed to the apply drain.
    applied: u64,
    /// Pipelining window: local proposals only claim slots in
    /// `applied+1 ..= applied+alpha`.
    alpha: u64,
    instances: HashMap<u64, Instance>,
    /// Slots this node has an open local proposal on.
    claimed: HashSet<u64>,
    /// Decided but not yet releasable in order.
    pending: BTreeMap<u64, String>,
    /// Proposals parked while the window is saturated.
    backlog: VecDeque<(String, oneshot::Sender<u64>)>,
    cmd_tx: mpsc::UnboundedSender<Cmd>,
    /// Where instances report their decisions.
    dec_tx: mpsc::UnboundedSender<(u64, String)>,
    decided_out: mpsc::UnboundedSender<(u64, String)>,
}

impl Manager {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Cmd>,
        mut packet_rx: mpsc::UnboundedReceiver<Packet>,
        mut dec_rx: mpsc::UnboundedReceiver<(u64, String)>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break };
                    match cmd {
                        Cmd::Propose { value, reply } => self.propose(value, reply),
                        Cmd::Fill { upto } => self.fill(upto),
                    }
                }
                pkt = packet_rx.recv() => {
                    let Some(pkt) = pkt else { break };
                    self.dispatch(pkt);
                }
                decided = dec_rx.recv() => {
                    // Never None: self.dec_tx keeps the channel open.
                    if let Some((seqn, value)) = decided {
                        self.decided(seqn, value);
                    }
                }
            }
        }
        debug!(node = self.cluster.self_id(), "consensus manager stopped");
    }

    fn self_addr(&self) -> SocketAddr {
        self.cluster.members()[self.cluster.self_index()].addr
    }

    fn instance(&mut self, seqn: u64) -> &Instance {
        let cluster = self.cluster.clone();
        let dec_tx = self.dec_tx.clone();
        self.instances
            .entry(seqn)
            .or_insert_with(|| Instance::spawn(seqn, cluster, dec_tx))
    }

    /// Routes one inbound packet. Slots at or below `applied` are settled;
    /// the sender gets the decided mutation back as a `Learn`.
    fn dispatch(&mut self, pkt: Packet) {
        let seqn = pkt.msg.seqn;
        if seqn <= self.applied {
            if matches!(pkt.msg.body, Body::Learn { .. } | Body::Accepted { .. }) {
                return;
            }
            match self.store.event_at(seqn) {
                Some(ev) => self.cluster.send_to(
                    pkt.from,
                    Msg::new(seqn, Body::Learn { value: ev.mutation }),
                ),
                None => trace!(seqn, "settled slot already cleaned, no Learn to offer"),
            }
            return;
        }
        if self.pending.contains_key(&seqn) {
            return;
        }
        self.instance(seqn).deliver(pkt);
    }

    fn propose(&mut self, value: String, reply: oneshot::Sender<u64>) {
        let Some(seqn) = self.free_slot() else {
            // Window saturated; park the request until applies catch up.
            self.backlog.push_back((value, reply));
            return;
        };
        self.claimed.insert(seqn);
        let self_addr = self.self_addr();
        self.instance(seqn).propose(self_addr, value);
        let _ = reply.send(seqn);
    }

    /// Lowest slot in the window with neither a local claim nor a
    /// decision, or None when the window is saturated.
    fn free_slot(&self) -> Option<u64> {
        (self.applied + 1..=self.applied + self.alpha)
            .find(|s| !self.claimed.contains(s) && !self.pending.contains_key(s))
    }

    fn decided(&mut self, seqn: u64, value: String) {
        self.instances.remove(&seqn);
        if seqn <= self.applied {
            return;
        }
        self.pending.insert(seqn, value);
        self.drain();
        if let Some((&max, _)) = self.pending.iter().next_back() {
            // Later slots decided first; give the stragglers a moment,
            // then plug the gaps with no-ops so applies can resume.
            let cmd_tx = self.cmd_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(FILL_DELAY).await;
                let _ = cmd_tx.send(Cmd::Fill { upto: max });
            });
        }
    }

    fn drain(&mut self) {
        while let Some(value) = self.pending.remove(&(self.applied + 1)) {
            self.applied += 1;
            self.claimed.remove(&self.applied);
            if self.decided_out.send((self.applied, value)).is_err() {
                warn!("apply drain gone, dropping decisions");
                return;
            }
        }
        // Freed window slots unblock parked proposals.
        while !self.backlog.is_empty() && self.free_slot().is_some() {
            let (value, reply) = self.backlog.pop_front().unwrap();
            self.propose(value, reply);
        }
    }

    fn fill(&mut self, upto: u64) {
        let self_addr = self.self_addr();
        for seqn in self.applied + 1..upto {
            if self.pending.contains_key(&seqn) || self.claimed.contains(&seqn) {
                continue;
            }
            debug!(seqn, "filling idle slot with a no-op");
            self.instance(seqn).propose(self_addr, NOP.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paxos::cluster::Member;
    use crate::store::encode_set;
    use crate::store::mutation::Cas;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    /// Single-node manager with a pump task feeding its own broadcasts
    /// back in, and an apply drain into the store.
    fn single_node(
        store: Store,
        alpha: u64,
    ) -> (ManagerHandle, tokio::task::JoinHandle<()>) {
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let (pkt_tx, pkt_rx) = mpsc::unbounded_channel();
        let (dec_tx, mut dec_rx) = mpsc::unbounded_channel();
        let members = vec![Member {
            id: "n1".to_string(),
            addr: addr(1),
        }];
        let cluster = Cluster::new("n1", members, out_tx);
        let handle = spawn(cluster, store.clone(), 0, alpha, pkt_rx, dec_tx);

        let pump = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some((_, msg)) = out_rx.recv() => {
                        let _ = pkt_tx.send(Packet { msg, from: addr(1) });
                    }
                    Some((seqn, value)) = dec_rx.recv() => {
                        store.apply(seqn, &value).unwrap();
                    }
                    else => break,
                }
            }
        });
        (handle, pump)
    }

    #[tokio::test]
    async fn propose_applies_and_returns_the_event() {
        let store = Store::new();
        let (handle, _pump) = single_node(store.clone(), 8);

        let ev = handle
            .propose(encode_set("/a", "1", Cas::Clobber).unwrap())
            .await
            .unwrap();
        assert_eq!(ev.seqn, 1);
        assert_eq!(ev.path, "/a");
        assert!(ev.err.is_none());
        assert_eq!(store.get("/a"), (vec!["1".to_string()], Cas::At(1)));
    }

    #[tokio::test]
    async fn proposals_land_on_consecutive_slots() {
        let store = Store::new();
        let (handle, _pump) = single_node(store.clone(), 8);

        for i in 1..=5u64 {
            let ev = handle
                .propose(encode_set("/k", &i.to_string(), Cas::Clobber).unwrap())
                .await
                .unwrap();
            assert_eq!(ev.seqn, i);
        }
        assert_eq!(store.seqn(), 5);
    }

    #[tokio::test]
    async fn cas_rejection_comes_back_in_the_event() {
        let store = Store::new();
        let (handle, _pump) = single_node(store.clone(), 8);

        handle
            .propose(encode_set("/a", "1", Cas::Clobber).unwrap())
            .await
            .unwrap();
        let ev = handle
            .propose(encode_set("/a", "2", Cas::At(99)).unwrap())
            .await
            .unwrap();
        assert_eq!(ev.seqn, 2);
        assert!(matches!(ev.err, Some(ConcordError::CasMismatch { .. })));
        // The slot is consumed even though the write was refused.
        assert_eq!(store.seqn(), 2);
        assert_eq!(store.get("/a"), (vec!["1".to_string()], Cas::At(1)));
    }
}
