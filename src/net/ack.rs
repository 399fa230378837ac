//! Positive-acknowledgement layer over datagrams.
//!
//! Consensus tolerates lost messages but converges much faster when they
//! arrive, so every payload is framed with a per-sender sequence number
//! and resent on a timer until the peer acknowledges it or the sender
//! gives up. Receivers ack every data frame, duplicates included, and
//! deliver each (sender, seq) at most once.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::core::error::{ConcordError, ConcordResult};
use crate::net::datagram::{Datagram, MAX_DATAGRAM};

/// Resend cadence for unacknowledged frames.
const RESEND_INTERVAL: Duration = Duration::from_millis(100);
/// Total time to keep retrying one frame before giving up on it.
const GIVE_UP: Duration = Duration::from_secs(10);
/// Per-peer count of remembered sequence numbers for duplicate
/// suppression.
const DEDUP_WINDOW: u64 = 8192;

#[derive(Debug, Serialize, Deserialize)]
enum Frame {
    Data { seq: u64, payload: Vec<u8> },
    Ack { seq: u64 },
}

impl Frame {
    fn encode(&self) -> ConcordResult<Vec<u8>> {
        bincode::serialize(self).map_err(ConcordError::transport)
    }

    fn decode(bytes: &[u8]) -> ConcordResult<Frame> {
        bincode::deserialize(bytes).map_err(ConcordError::transport)
    }
}

/// Transport counters.
#[derive(Debug, Default)]
pub struct AckStats {
    pub sent: AtomicU64,
    pub retransmits: AtomicU64,
    pub acked: AtomicU64,
    pub expired: AtomicU64,
    pub duplicates: AtomicU64,
}

struct Pending {
    /// The whole encoded frame; cheap to clone for retransmission.
    frame: Bytes,
    first_sent: Instant,
}

struct Shared {
    conn: Arc<dyn Datagram>,
    next_seq: AtomicU64,
    pending: Mutex<HashMap<(SocketAddr, u64), Pending>>,
    stats: AckStats,
}

/// Sending half of an ackified connection.
#[derive(Clone)]
pub struct Acker {
    shared: Arc<Shared>,
}

impl Acker {
    /// Sends `payload` to `addr`, retrying until acked or expired.
    pub async fn send(&self, payload: &[u8], addr: SocketAddr) -> ConcordResult<()> {
        let seq = self.shared.next_seq.fetch_add(1, Ordering::Relaxed);
        let frame: Bytes = Frame::Data {
            seq,
            payload: payload.to_vec(),
        }
        .encode()?
        .into();
        self.shared.pending.lock().insert(
            (addr, seq),
            Pending {
                frame: frame.clone(),
                first_sent: Instant::now(),
            },
        );
        self.shared.stats.sent.fetch_add(1, Ordering::Relaxed);
        self.shared.conn.send_to(&frame, addr).await?;
        Ok(())
    }

    pub fn stats(&self) -> &AckStats {
        &self.shared.stats
    }

    /// Count of frames still awaiting acknowledgement.
    pub fn in_flight(&self) -> usize {
        self.shared.pending.lock().len()
    }
}

/// Wraps `conn` with ack/retransmit framing.
///
/// Returns the sending half and a channel of exactly-once inbound
/// payloads. Two background tasks drive the receive path and the resend
/// timer; both stop when the connection or the delivery channel closes.
pub fn ackify(conn: Arc<dyn Datagram>) -> (Acker, mpsc::UnboundedReceiver<(Bytes, SocketAddr)>) {
    let shared = Arc::new(Shared {
        conn,
        next_seq: AtomicU64::new(1),
        pending: Mutex::new(HashMap::new()),
        stats: AckStats::default(),
    });
    let (deliver_tx, deliver_rx) = mpsc::unbounded_channel();

    tokio::spawn(recv_loop(Arc::clone(&shared), deliver_tx));
    tokio::spawn(resend_loop(Arc::clone(&shared)));

    (Acker { shared }, deliver_rx)
}

async fn recv_loop(
    shared: Arc<Shared>,
    deliver_tx: mpsc::UnboundedSender<(Bytes, SocketAddr)>,
) {
    // seqs already delivered, per peer.
    let mut seen: HashMap<SocketAddr, BTreeSet<u64>> = HashMap::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (n, from) = match shared.conn.recv_from(&mut buf).await {
            Ok(got) => got,
            Err(err) => {
                debug!(%err, "transport receive stopped");
                return;
            }
        };
        let frame = match Frame::decode(&buf[..n]) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(%from, %err, "malformed frame dropped");
                continue;
            }
        };
        match frame {
            Frame::Data { seq, payload } => {
                // Always ack, duplicate or not; the first ack may have
                // been lost.
                if let Ok(ack) = (Frame::Ack { seq }).encode() {
                    let _ = shared.conn.send_to(&ack, from).await;
                }
                let seqs = seen.entry(from).or_default();
                if !seqs.insert(seq) {
                    shared.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                    trace!(%from, seq, "duplicate frame suppressed");
                    continue;
                }
                if let Some(&max) = seqs.iter().next_back() {
                    let floor = max.saturating_sub(DEDUP_WINDOW);
                    *seqs = seqs.split_off(&floor);
                }
                if deliver_tx.send((Bytes::from(payload), from)).is_err() {
                    return;
                }
            }
            Frame::Ack { seq } => {
                if shared.pending.lock().remove(&(from, seq)).is_some() {
                    shared.stats.acked.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

async fn resend_loop(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(RESEND_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if Arc::strong_count(&shared) == 1 {
            // Only this loop holds the transport; everything else is gone.
            return;
        }
        let now = Instant::now();
        let resend: Vec<(SocketAddr, Bytes)> = {
            let mut pending = shared.pending.lock();
            let before = pending.len();
            pending.retain(|_, p| now.duration_since(p.first_sent) < GIVE_UP);
            let expired = before - pending.len();
            if expired > 0 {
                shared
                    .stats
                    .expired
                    .fetch_add(expired as u64, Ordering::Relaxed);
                debug!(expired, "gave up on unacknowledged frames");
            }
            pending
                .iter()
                .map(|((addr, _), p)| (*addr, p.frame.clone()))
                .collect()
        };
        for (addr, frame) in resend {
            shared.stats.retransmits.fetch_add(1, Ordering::Relaxed);
            let _ = shared.conn.send_to(&frame, addr).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::datagram::MemNet;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[tokio::test]
    async fn payload_arrives_and_gets_acked() {
        let net = MemNet::new();
        let (a, _arx) = ackify(Arc::new(net.bind(addr(1))));
        let (_b, mut brx) = ackify(Arc::new(net.bind(addr(2))));

        a.send(b"payload", addr(2)).await.unwrap();
        let (data, from) = brx.recv().await.unwrap();
        assert_eq!(&data[..], b"payload");
        assert_eq!(from, addr(1));

        // The ack clears the pending slot.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.in_flight(), 0);
        assert_eq!(a.stats().acked.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn retransmission_survives_loss() {
        // Half the datagrams vanish; retries still get it through.
        let net = MemNet::lossy(0.5);
        let (a, _arx) = ackify(Arc::new(net.bind(addr(1))));
        let (_b, mut brx) = ackify(Arc::new(net.bind(addr(2))));

        a.send(b"persistent", addr(2)).await.unwrap();
        let (data, _) = tokio::time::timeout(Duration::from_secs(8), brx.recv())
            .await
            .expect("delivery before retries give up")
            .unwrap();
        assert_eq!(&data[..], b"persistent");
    }

    #[tokio::test]
    async fn duplicates_are_delivered_once() {
        let net = MemNet::new();
        let raw = Arc::new(net.bind(addr(1)));
        let (_b, mut brx) = ackify(Arc::new(net.bind(addr(2))));

        // Hand-craft the same data frame twice, as a retransmit would.
        let frame = Frame::Data {
            seq: 7,
            payload: b"once".to_vec(),
        }
        .encode()
        .unwrap();
        raw.send_to(&frame, addr(2)).await.unwrap();
        raw.send_to(&frame, addr(2)).await.unwrap();

        let (data, _) = brx.recv().await.unwrap();
        assert_eq!(&data[..], b"once");
        let again = tokio::time::timeout(Duration::from_millis(100), brx.recv()).await;
        assert!(again.is_err(), "duplicate must not be delivered");
    }

    #[tokio::test]
    async fn unreachable_peer_expires_after_give_up() {
        tokio::time::pause();
        let net = MemNet::new();
        let (a, _arx) = ackify(Arc::new(net.bind(addr(1))));

        a.send(b"void", addr(9)).await.unwrap();
        assert_eq!(a.in_flight(), 1);
        tokio::time::advance(GIVE_UP + RESEND_INTERVAL * 2).await;
        // Let the resend loop observe the advance.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(a.in_flight(), 0);
        assert_eq!(a.stats().expired.load(Ordering::Relaxed), 1);
    }
}
