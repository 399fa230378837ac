//! Replica runtime orchestration.
//!
//! Start order: journal replay → store → transport → consensus manager →
//! apply drain → pulse → gc. Shutdown reverses it: the watch channel
//! stops the periodic tasks, and dropping the channels between the pumps
//! winds the rest down.
//!
//! The apply drain is the only writer to the store and the journal. A
//! seqn violation or journal failure there is unrecoverable and stops
//! the replica, which must restart and replay.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::core::config::Config;
use crate::journal::{self, Journal};
use crate::life;
use crate::net::{ackify, Acker};
use crate::paxos::{manager, Cluster, ManagerHandle, Member, Msg, Packet};
use crate::store::Store;

/// A running replica.
pub struct Runtime {
    config: Arc<Config>,
    store: Store,
    manager: ManagerHandle,
    shutdown_tx: watch::Sender<bool>,
}

impl Runtime {
    /// Brings the replica up: replays the journal, binds the transport
    /// and spawns every background task.
    pub async fn start(config: Config) -> Result<Runtime> {
        config.validate().context("invalid configuration")?;
        let config = Arc::new(config);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Recover local state before talking to anyone.
        let store = Store::new();
        let applied = journal::replay(&config.journal.path, &store)
            .context("journal replay failed")?;
        let journal = Journal::open(&config.journal.path).context("journal open failed")?;
        info!(applied, id = %config.node.id, "store recovered");

        let socket = UdpSocket::bind(config.node.bind)
            .await
            .with_context(|| format!("binding {}", config.node.bind))?;
        info!(addr = %config.node.bind, "consensus transport bound");
        let (acker, inbound) = ackify(Arc::new(socket));

        let members: Vec<Member> = config
            .cluster
            .members
            .iter()
            .map(|m| Member {
                id: m.id.clone(),
                addr: m.addr,
            })
            .collect();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let cluster = Cluster::new(&config.node.id, members, out_tx);

        let (pkt_tx, pkt_rx) = mpsc::unbounded_channel();
        let (decided_tx, decided_rx) = mpsc::unbounded_channel();
        let handle = manager::spawn(
            cluster,
            store.clone(),
            applied,
            config.cluster.alpha,
            pkt_rx,
            decided_tx,
        );

        tokio::spawn(outbound_pump(out_rx, acker));
        tokio::spawn(inbound_pump(inbound, pkt_tx));
        tokio::spawn(apply_drain(
            decided_rx,
            store.clone(),
            journal,
            shutdown_tx.clone(),
        ));

        let proposer: Arc<dyn crate::paxos::Proposer> = Arc::new(handle.clone());
        tokio::spawn(life::run_pulse(
            Arc::clone(&proposer),
            store.clone(),
            config.node.id.clone(),
            Duration::from_millis(config.liveness.pulse_interval_ms),
            shutdown_rx.clone(),
        ));
        tokio::spawn(life::run_cleaner(
            store.clone(),
            config.member_ids(),
            Duration::from_millis(config.liveness.clean_interval_ms),
            shutdown_rx.clone(),
        ));
        tokio::spawn(life::run_reaper(
            proposer,
            store.clone(),
            Duration::from_millis(config.liveness.reap_interval_ms),
            shutdown_rx,
        ));

        Ok(Runtime {
            config,
            store,
            manager: handle,
            shutdown_tx,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The replica's proposal surface.
    pub fn proposer(&self) -> ManagerHandle {
        self.manager.clone()
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Run until ctrl-c or an internal fatal error.
    pub async fn wait(&self) {
        let mut rx = self.shutdown_tx.subscribe();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                self.shutdown();
            }
            _ = rx.changed() => {}
        }
    }
}

/// Ships outbound consensus messages through the ack layer.
async fn outbound_pump(mut out_rx: mpsc::UnboundedReceiver<(std::net::SocketAddr, Msg)>, acker: Acker) {
    while let Some((addr, msg)) = out_rx.recv().await {
        let bytes = match msg.encode() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "unencodable message dropped");
                continue;
            }
        };
        if let Err(err) = acker.send(&bytes, addr).await {
            warn!(%addr, %err, "send failed");
        }
    }
}

/// Decodes delivered payloads into consensus packets for the manager.
async fn inbound_pump(
    mut inbound: mpsc::UnboundedReceiver<(bytes::Bytes, std::net::SocketAddr)>,
    pkt_tx: mpsc::UnboundedSender<Packet>,
) {
    while let Some((bytes, from)) = inbound.recv().await {
        match Msg::decode(&bytes) {
            Ok(msg) => {
                if pkt_tx.send(Packet { msg, from }).is_err() {
                    return;
                }
            }
            Err(err) => warn!(%from, %err, "undecodable packet dropped"),
        }
    }
}

/// The single writer: journals each decision, then applies it.
///
/// Journal-before-apply means a crash between the two replays the
/// mutation on restart; applies are idempotent at the same seqn because
/// replay reconstructs the identical sequence.
async fn apply_drain(
    mut decided_rx: mpsc::UnboundedReceiver<(u64, String)>,
    store: Store,
    mut journal: Journal,
    shutdown_tx: watch::Sender<bool>,
) {
    while let Some((seqn, value)) = decided_rx.recv().await {
        if let Err(err) = journal.append(&value) {
            error!(seqn, %err, "journal append failed, stopping replica");
            let _ = shutdown_tx.send(true);
            return;
        }
        match store.apply(seqn, &value) {
            Ok(ev) => {
                if let Some(err) = &ev.err {
                    // Refused mutations still consume the slot; the
                    // proposer sees the reason through its wait.
                    tracing::debug!(seqn, %err, "mutation refused");
                }
            }
            Err(err) => {
                error!(seqn, %err, "apply failed, stopping replica");
                let _ = shutdown_tx.send(true);
                return;
            }
        }
    }
}
