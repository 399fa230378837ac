//! Garbage collection: event log cleaning and session reaping.
//!
//! The cleaner releases retained store events once every configured
//! member has applied past them, reading each peer's pulse file. The
//! reaper watches session files under `/ctl/sess/` (body: expiry deadline
//! in unix milliseconds) and proposes deletions once they lapse.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::life::pulse::applied_path;
use crate::paxos::{self, Proposer};
use crate::store::mutation::Cas;
use crate::store::{walk, Store};

/// Glob selecting every session file.
pub const SESSION_GLOB: &str = "/ctl/sess/**";

/// Periodically cleans the store's event log up to the lowest applied
/// seqn any member has published. Members without a pulse file hold the
/// floor at zero, so nothing is released until the whole cluster reports.
pub async fn run_cleaner(
    store: Store,
    member_ids: Vec<String>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut cleaned = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => return,
        }
        let Some(floor) = cluster_floor(&store, &member_ids) else {
            continue;
        };
        if floor > cleaned {
            debug!(floor, "cleaning event log");
            store.clean(floor);
            cleaned = floor;
        }
    }
}

/// Lowest applied seqn across all members, or None while any member has
/// yet to publish one.
fn cluster_floor(store: &Store, member_ids: &[String]) -> Option<u64> {
    let snapshot = store.snapshot();
    let mut floor = u64::MAX;
    for id in member_ids {
        let applied: u64 = snapshot.body_at(&applied_path(id))?.parse().ok()?;
        floor = floor.min(applied);
    }
    (floor != u64::MAX).then_some(floor)
}

/// Watches session files and deletes them once their deadline passes.
pub async fn run_reaper(
    proposer: Arc<dyn Proposer>,
    store: Store,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut events = match store.watch(SESSION_GLOB) {
        Ok(rx) => rx,
        Err(err) => {
            warn!(%err, "session watch failed, reaper disabled");
            return;
        }
    };
    // path -> expiry deadline, unix millis. Sessions that were written
    // before this task started come from the snapshot; the watch covers
    // everything after it.
    let mut deadlines: HashMap<String, u64> = HashMap::new();
    walk(&store.snapshot(), "/ctl/sess", &mut |path, body, _| {
        match body.parse::<u64>() {
            Ok(deadline) => {
                deadlines.insert(path.to_string(), deadline);
            }
            Err(_) => warn!(%path, %body, "unparseable session deadline"),
        }
    });
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            ev = events.recv() => {
                let Some(ev) = ev else { return };
                if ev.is_del() {
                    deadlines.remove(&ev.path);
                } else if let Ok(deadline) = ev.body.parse::<u64>() {
                    deadlines.insert(ev.path.clone(), deadline);
                } else {
                    warn!(path = %ev.path, body = %ev.body, "unparseable session deadline");
                }
            }
            _ = ticker.tick() => {
                let now = unix_millis();
                let lapsed: Vec<String> = deadlines
                    .iter()
                    .filter(|(_, &deadline)| deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in lapsed {
                    info!(%path, "reaping lapsed session");
                    if let Err(err) = paxos::del(proposer.as_ref(), &path, Cas::Clobber).await {
                        // Already gone, or renewed between tick and decide;
                        // the watch event will resync the table either way.
                        debug!(%path, %err, "session delete not applied");
                    }
                    deadlines.remove(&path);
                }
            }
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
