//! Static cluster membership and outbound message routing.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::paxos::message::Msg;

/// One replica in the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: String,
    pub addr: SocketAddr,
}

/// Fixed membership view shared by every consensus instance.
///
/// Members are held sorted by id so that every replica computes the same
/// index for each peer; round numbers are partitioned by that index.
#[derive(Debug, Clone)]
pub struct Cluster {
    self_id: String,
    members: Vec<Member>,
    out: mpsc::UnboundedSender<(SocketAddr, Msg)>,
}

impl Cluster {
    /// Builds a membership view. `members` need not be pre-sorted; the
    /// local node must appear in the list.
    pub fn new(
        self_id: &str,
        mut members: Vec<Member>,
        out: mpsc::UnboundedSender<(SocketAddr, Msg)>,
    ) -> Cluster {
        members.sort_by(|a, b| a.id.cmp(&b.id));
        let cluster = Cluster {
            self_id: self_id.to_string(),
            members,
            out,
        };
        assert!(
            cluster.members.iter().any(|m| m.id == cluster.self_id),
            "local node {:?} missing from member list",
            cluster.self_id
        );
        cluster
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Majority size: any two quorums intersect.
    pub fn quorum(&self) -> usize {
        self.members.len() / 2 + 1
    }

    pub fn self_id(&self) -> &str {
        &self.self_id
    }

    /// Position of the local node in the sorted member list.
    pub fn self_index(&self) -> usize {
        self.members
            .iter()
            .position(|m| m.id == self.self_id)
            .unwrap_or(0)
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    /// Index of the member bound to `addr`, if any. Packets from unknown
    /// addresses are dropped by the caller.
    pub fn index_of_addr(&self, addr: SocketAddr) -> Option<usize> {
        self.members.iter().position(|m| m.addr == addr)
    }

    /// Sends `msg` to every member, the local node included. Delivery
    /// failures surface as missing promises, never as errors here.
    pub fn broadcast(&self, msg: &Msg) {
        for m in &self.members {
            let _ = self.out.send((m.addr, msg.clone()));
        }
    }

    pub fn send_to(&self, addr: SocketAddr, msg: Msg) {
        let _ = self.out.send((addr, msg));
    }
}
