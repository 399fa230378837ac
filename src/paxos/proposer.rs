//! Proposer (coordinator) state for one consensus slot.
//!
//! Round numbers are partitioned by proposer identity: this proposer only
//! ever uses rounds congruent to its cluster index modulo the cluster size,
//! so no two proposers share a round.

use std::collections::HashSet;

use crate::paxos::message::Body;

/// Drives phases 1 and 2 for this node's proposal on one slot.
#[derive(Debug)]
pub struct Proposer {
    cluster_len: u64,
    quorum: usize,

    /// Current round; starts at `self_index` and advances by `cluster_len`.
    crnd: u64,
    /// Highest round observed in any promise. When this passes `crnd`,
    /// another proposer is competing and a re-prepare is warranted.
    pub seen: u64,

    begun: bool,
    /// The value this node wants decided.
    target: String,
    /// Set once phase 2 has started for the current round.
    chosen: Option<String>,
    /// Highest vround reported by a promise, and its value.
    vr: u64,
    vv: String,
    promised: HashSet<usize>,
}

impl Proposer {
    pub fn new(self_index: usize, cluster_len: usize, quorum: usize) -> Proposer {
        Proposer {
            cluster_len: cluster_len as u64,
            quorum,
            crnd: self_index as u64,
            seen: 0,
            begun: false,
            target: String::new(),
            chosen: None,
            vr: 0,
            vv: String::new(),
            promised: HashSet::new(),
        }
    }

    /// True once a proposal round has higher-round competition.
    pub fn is_contended(&self) -> bool {
        self.begun && self.seen > self.crnd
    }

    /// Feed one message; returns a body to broadcast, if any.
    pub fn update(&mut self, from: usize, body: &Body) -> Option<Body> {
        // First activity claims this proposer's initial round.
        if self.crnd < self.cluster_len {
            self.crnd += self.cluster_len;
        }

        match body {
            Body::Propose { value } => {
                if self.begun {
                    return None;
                }
                self.begun = true;
                self.target = value.clone();
                self.restart_round(false)
            }
            Body::Promise {
                round,
                vround,
                vvalue,
            } => {
                if !self.begun || self.chosen.is_some() {
                    return None;
                }
                if *round > self.seen {
                    self.seen = *round;
                }
                if *round != self.crnd {
                    return None;
                }
                if *vround > self.vr {
                    self.vr = *vround;
                    self.vv = vvalue.clone();
                }
                self.promised.insert(from);
                if self.promised.len() < self.quorum {
                    return None;
                }
                // A prior accepted value binds us; otherwise push our own.
                let value = if self.vr > 0 {
                    self.vv.clone()
                } else {
                    self.target.clone()
                };
                self.chosen = Some(value.clone());
                Some(Body::Accept {
                    round: self.crnd,
                    value,
                })
            }
            Body::Tick => {
                if !self.begun {
                    return None;
                }
                self.restart_round(true)
            }
            _ => None,
        }
    }

    // Begin (or re-begin) phase 1 with a fresh round.
    fn restart_round(&mut self, advance: bool) -> Option<Body> {
        if advance {
            self.crnd += self.cluster_len;
        }
        self.vr = 0;
        self.vv.clear();
        self.promised.clear();
        self.chosen = None;
        Some(Body::Prepare { round: self.crnd })
    }
}
