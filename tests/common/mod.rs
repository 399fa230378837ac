//! Shared test harness: whole replicas wired over an in-memory network.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use concord::net::{ackify, MemNet};
use concord::paxos::{manager, Cluster, ManagerHandle, Member, Msg, Packet};
use concord::store::Store;

pub struct TestNode {
    pub id: String,
    pub store: Store,
    pub handle: ManagerHandle,
}

pub fn addr(port: u16) -> SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

/// Builds an `n`-replica cluster on `net`. Each node gets the full
/// transport/manager/apply pipeline of a real replica, minus the journal.
pub fn cluster(net: &Arc<MemNet>, n: u16, alpha: u64) -> Vec<TestNode> {
    let members: Vec<Member> = (1..=n)
        .map(|i| Member {
            id: format!("n{i}"),
            addr: addr(i),
        })
        .collect();

    (1..=n)
        .map(|i| {
            let id = format!("n{i}");
            let socket = Arc::new(net.bind(addr(i)));
            let (acker, mut inbound) = ackify(socket);
            let (out_tx, mut out_rx) = mpsc::unbounded_channel();
            let cluster = Cluster::new(&id, members.clone(), out_tx);
            let (pkt_tx, pkt_rx) = mpsc::unbounded_channel();
            let (dec_tx, mut dec_rx) = mpsc::unbounded_channel();
            let store = Store::new();
            let handle = manager::spawn(cluster, store.clone(), 0, alpha, pkt_rx, dec_tx);

            tokio::spawn(async move {
                while let Some((dst, msg)) = out_rx.recv().await {
                    if let Ok(bytes) = Msg::encode(&msg) {
                        let _ = acker.send(&bytes, dst).await;
                    }
                }
            });
            tokio::spawn(async move {
                while let Some((bytes, from)) = inbound.recv().await {
                    if let Ok(msg) = Msg::decode(&bytes) {
                        if pkt_tx.send(Packet { msg, from }).is_err() {
                            return;
                        }
                    }
                }
            });
            let drain_store = store.clone();
            tokio::spawn(async move {
                while let Some((seqn, value)) = dec_rx.recv().await {
                    drain_store
                        .apply(seqn, &value)
                        .expect("in-order apply");
                }
            });

            TestNode { id, store, handle }
        })
        .collect()
}

/// Polls until every node has applied through `seqn`, or panics.
pub async fn converge(nodes: &[TestNode], seqn: u64) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if nodes.iter().all(|node| node.store.seqn() >= seqn) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            let seqns: Vec<u64> = nodes.iter().map(|node| node.store.seqn()).collect();
            panic!("cluster did not converge to seqn {seqn}, at {seqns:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
