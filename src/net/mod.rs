//! Cluster transport: datagram sockets plus ack/retransmit framing.

pub mod ack;
pub mod datagram;

pub use ack::{ackify, Acker};
pub use datagram::{Datagram, MemNet, MemSocket, MAX_DATAGRAM};
