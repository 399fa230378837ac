//! Consensus wire messages.
//!
//! Every message names the slot (seqn) it belongs to; the sender's identity
//! is recovered from the datagram source address on receipt. Encoding is
//! bincode inside the ack layer's frame.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::core::error::{ConcordError, ConcordResult};

/// Message bodies for one consensus slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Body {
    /// Ask the local proposer to begin agreement on `value`. Never sent on
    /// the wire; injected by the manager.
    Propose { value: String },
    /// Phase 1a: claim round `round`.
    Prepare { round: u64 },
    /// Phase 1b: promise for `round`, reporting any previously accepted
    /// round and value (`vround == 0` means none).
    Promise {
        round: u64,
        vround: u64,
        vvalue: String,
    },
    /// Phase 2a: ask acceptors to accept `value` at `round`.
    Accept { round: u64, value: String },
    /// Phase 2b: an acceptor accepted `value` at `round`.
    Accepted { round: u64, value: String },
    /// A learner's shortcut: the slot has decided `value`.
    Learn { value: String },
    /// Local retry timer; never sent on the wire.
    Tick,
}

/// A slot-addressed consensus message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Msg {
    pub seqn: u64,
    pub body: Body,
}

impl Msg {
    pub fn new(seqn: u64, body: Body) -> Msg {
        Msg { seqn, body }
    }

    /// Encode for the wire.
    pub fn encode(&self) -> ConcordResult<Vec<u8>> {
        bincode::serialize(self).map_err(ConcordError::transport)
    }

    /// Decode from the wire. A malformed packet is a transport error for
    /// that packet only; the peer stream stays up.
    pub fn decode(bytes: &[u8]) -> ConcordResult<Msg> {
        bincode::deserialize(bytes).map_err(ConcordError::transport)
    }
}

/// A received message with its datagram source.
#[derive(Debug, Clone)]
pub struct Packet {
    pub msg: Msg,
    pub from: SocketAddr,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let msgs = [
            Msg::new(3, Body::Prepare { round: 7 }),
            Msg::new(
                3,
                Body::Promise {
                    round: 7,
                    vround: 0,
                    vvalue: String::new(),
                },
            ),
            Msg::new(
                4,
                Body::Accept {
                    round: 7,
                    value: ":/a=1".to_string(),
                },
            ),
            Msg::new(
                4,
                Body::Learn {
                    value: "nop:".to_string(),
                },
            ),
        ];
        for msg in msgs {
            let bytes = msg.encode().unwrap();
            assert_eq!(Msg::decode(&bytes).unwrap(), msg);
        }
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(Msg::decode(&[0xff; 3]).is_err());
    }
}
