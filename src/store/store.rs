//! The replicated store.
//!
//! [`Store`] applies agreed mutations in strict seqn order, maintains the
//! path tree, and fans events out to watchers and waiters. Exactly one task
//! (the runtime's apply loop) calls [`Store::apply`]; every other consumer
//! reads snapshots or receives events over channels, so the tree itself
//! needs no reader locking.
//!
//! Applying a seqn out of order (gap or repeat) returns
//! [`ConcordError::SeqnViolation`], which is fatal to the local replica:
//! the sanctioned recovery is journal replay, never a silent skip.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::core::error::{ConcordError, ConcordResult};
use crate::store::event::Event;
use crate::store::glob::Glob;
use crate::store::mutation::Cas;
use crate::store::node::Node;

struct WatchSub {
    glob: Glob,
    tx: mpsc::UnboundedSender<Event>,
}

struct Inner {
    root: Arc<Node>,
    seqn: u64,
    /// Applied events retained for late `wait` calls and learn replies.
    log: BTreeMap<u64, Event>,
    /// Events at or below this seqn have been cleaned from the log.
    floor: u64,
    watches: Vec<WatchSub>,
    waits: HashMap<u64, Vec<oneshot::Sender<Event>>>,
}

/// Shared handle to the store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl Store {
    /// Create an empty store. Seqn 0 is the creation of the store; the
    /// first mutation applies at seqn 1.
    pub fn new() -> Store {
        Store {
            inner: Arc::new(Mutex::new(Inner {
                root: Arc::new(Node::empty_dir()),
                seqn: 0,
                log: BTreeMap::new(),
                floor: 0,
                watches: Vec::new(),
                waits: HashMap::new(),
            })),
        }
    }

    /// Last applied seqn.
    pub fn seqn(&self) -> u64 {
        self.inner.lock().seqn
    }

    /// Point-in-time snapshot of the tree.
    pub fn snapshot(&self) -> Arc<Node> {
        Arc::clone(&self.inner.lock().root)
    }

    /// Look up `path` in the current snapshot.
    pub fn get(&self, path: &str) -> (Vec<String>, Cas) {
        self.snapshot().get(path)
    }

    /// The retained event for `seqn`, if it has not been cleaned.
    pub fn event_at(&self, seqn: u64) -> Option<Event> {
        self.inner.lock().log.get(&seqn).cloned()
    }

    /// Apply the agreed mutation for `seqn`.
    ///
    /// Returns the event even when the mutation was rejected at
    /// application level (the event then carries the error); returns `Err`
    /// only for the fatal out-of-order case.
    pub fn apply(&self, seqn: u64, encoded: &str) -> ConcordResult<Event> {
        let mut inner = self.inner.lock();
        let expected = inner.seqn + 1;
        if seqn != expected {
            return Err(ConcordError::SeqnViolation {
                expected,
                got: seqn,
            });
        }

        let (root, ev) = inner.root.apply(seqn, encoded);
        inner.root = root;
        inner.seqn = seqn;
        inner.log.insert(seqn, ev.clone());

        debug!(seqn, desc = ev.desc(), path = %ev.path, "apply");

        // Watchers see only real path changes; waiters see everything,
        // including rejections and no-ops, so propose can always unblock.
        if ev.is_set() || ev.is_del() {
            inner
                .watches
                .retain(|w| !w.glob.matches(&ev.path) || w.tx.send(ev.clone()).is_ok());
        }
        if let Some(waiters) = inner.waits.remove(&seqn) {
            for tx in waiters {
                let _ = tx.send(ev.clone());
            }
        }
        Ok(ev)
    }

    /// Register for a single-fire notification of the event at `seqn`.
    ///
    /// If `seqn` was already applied, the retained event is delivered
    /// immediately; if it has been cleaned, the delivered event carries
    /// [`ConcordError::TooLate`].
    pub fn wait(&self, seqn: u64) -> oneshot::Receiver<Event> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        if seqn <= inner.seqn {
            let ev = inner.log.get(&seqn).cloned().unwrap_or_else(|| Event {
                seqn,
                path: String::new(),
                body: String::new(),
                cas: Cas::Missing,
                mutation: String::new(),
                err: Some(ConcordError::TooLate { seqn }),
                snapshot: Arc::clone(&inner.root),
            });
            let _ = tx.send(ev);
        } else {
            inner.waits.entry(seqn).or_default().push(tx);
        }
        rx
    }

    /// Subscribe to every future applied mutation whose path matches the
    /// glob `pattern`. Events arrive in seqn order, exactly once each.
    /// Dropping the receiver unregisters the watch.
    pub fn watch(&self, pattern: &str) -> ConcordResult<mpsc::UnboundedReceiver<Event>> {
        let glob = Glob::compile(pattern)?;
        debug!(pattern = glob.pattern(), "watch registered");
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().watches.push(WatchSub { glob, tx });
        Ok(rx)
    }

    /// Release retained events at or below `seqn`. Late waits for released
    /// seqns observe `TooLate`.
    pub fn clean(&self, seqn: u64) {
        let mut inner = self.inner.lock();
        if seqn <= inner.floor {
            return;
        }
        inner.floor = seqn;
        // split_off keeps seqn+1.. ; everything below is dropped.
        inner.log = inner.log.split_off(&(seqn + 1));
    }

    /// Number of live watch registrations.
    pub fn watch_count(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.watches.retain(|w| !w.tx.is_closed());
        inner.watches.len()
    }
}
