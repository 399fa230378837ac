//! Learner state for one consensus slot.

use std::collections::{HashMap, HashSet};

use crate::paxos::message::Body;

/// Counts `Accepted` votes until a quorum agrees on one value.
#[derive(Debug)]
pub struct Learner {
    quorum: usize,
    round: u64,
    votes: HashMap<String, usize>,
    voted: HashSet<usize>,
    decided: Option<String>,
}

impl Learner {
    pub fn new(quorum: usize) -> Learner {
        Learner {
            quorum,
            round: 1,
            votes: HashMap::new(),
            voted: HashSet::new(),
            decided: None,
        }
    }

    /// The decided value, once known. Permanent: later votes for other
    /// values at the same slot cannot change it.
    pub fn decided(&self) -> Option<&str> {
        self.decided.as_deref()
    }

    /// Feed one message; returns the decided value the moment the quorum
    /// is reached (and only that once).
    pub fn update(&mut self, from: usize, body: &Body) -> Option<String> {
        if self.decided.is_some() {
            return None;
        }
        let (round, value) = match body {
            Body::Accepted { round, value } => (*round, value),
            _ => return None,
        };

        if round < self.round {
            return None;
        }
        if round > self.round {
            // Votes from older rounds can never reach quorum once a newer
            // round is seen; start counting afresh.
            self.round = round;
            self.votes.clear();
            self.voted.clear();
        }
        if !self.voted.insert(from) {
            return None;
        }
        let count = self.votes.entry(value.clone()).or_insert(0);
        *count += 1;
        if *count >= self.quorum {
            self.decided = Some(value.clone());
            return Some(value.clone());
        }
        None
    }
}

/// Accepts a `Learn` shortcut from a peer that already knows the outcome.
#[derive(Debug, Default)]
pub struct Sink {
    decided: Option<String>,
}

impl Sink {
    pub fn new() -> Sink {
        Sink::default()
    }

    pub fn update(&mut self, body: &Body) -> Option<String> {
        if self.decided.is_some() {
            return None;
        }
        if let Body::Learn { value } = body {
            self.decided = Some(value.clone());
            return Some(value.clone());
        }
        None
    }
}
