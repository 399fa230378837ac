//! Acceptor state for one consensus slot.

use crate::paxos::message::Body;

/// The acceptor's promise/accept record.
///
/// Invariant: an acceptor never accepts a proposal numbered lower than one
/// it has already promised. Messages below the promised round are silently
/// ignored; proposers detect competition through the rounds they observe in
/// promises.
#[derive(Debug, Default)]
pub struct Acceptor {
    /// Highest round promised or accepted.
    rnd: u64,
    /// Round of the accepted value, 0 if none.
    vrnd: u64,
    /// The accepted value, if any.
    vval: String,
}

impl Acceptor {
    pub fn new() -> Acceptor {
        Acceptor::default()
    }

    /// Feed one message; returns a body to broadcast, if any.
    pub fn update(&mut self, body: &Body) -> Option<Body> {
        match body {
            Body::Prepare { round } => {
                if *round > self.rnd {
                    self.rnd = *round;
                    Some(Body::Promise {
                        round: *round,
                        vround: self.vrnd,
                        vvalue: self.vval.clone(),
                    })
                } else {
                    None
                }
            }
            Body::Accept { round, value } => {
                // Accept at or above the promise, but never re-accept the
                // round already voted (duplicate Accept suppression).
                if *round >= self.rnd && *round != self.vrnd {
                    self.rnd = *round;
                    self.vrnd = *round;
                    self.vval = value.clone();
                    Some(Body::Accepted {
                        round: *round,
                        value: value.clone(),
                    })
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}
