//! The hierarchical path tree.
//!
//! Nodes are immutable: every apply builds a new root that shares unchanged
//! subtrees with its predecessor via `Arc`. Readers and watchers therefore
//! hold consistent point-in-time snapshots without any locking; only the
//! apply loop ever constructs new roots.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::error::ConcordError;
use crate::store::event::Event;
use crate::store::mutation::{check_path, split_path, Cas, Mutation};

/// One node of the tree: a file body with its CAS token, or a directory
/// of named children (`cas == Cas::Dir`).
#[derive(Debug, Clone)]
pub struct Node {
    body: String,
    cas: Cas,
    children: BTreeMap<String, Arc<Node>>,
}

impl Default for Node {
    fn default() -> Self {
        Node::empty_dir()
    }
}

impl Node {
    /// An empty directory; the root of a fresh store.
    pub fn empty_dir() -> Node {
        Node {
            body: String::new(),
            cas: Cas::Dir,
            children: BTreeMap::new(),
        }
    }

    fn is_dir(&self) -> bool {
        self.cas == Cas::Dir
    }

    fn at(&self, parts: &[&str]) -> Option<&Node> {
        match parts.split_first() {
            None => Some(self),
            Some((head, rest)) => self.children.get(*head)?.at(rest),
        }
    }

    /// Look up `path`. Returns the values and CAS token:
    /// a missing path yields `([""], Missing)`, a directory yields its
    /// sorted child names and `Dir`, a file yields `([body], At(seqn))`.
    pub fn get(&self, path: &str) -> (Vec<String>, Cas) {
        if check_path(path).is_err() {
            return (vec![String::new()], Cas::Missing);
        }
        match self.at(&split_path(path)) {
            None => (vec![String::new()], Cas::Missing),
            Some(n) if n.is_dir() => (n.children.keys().cloned().collect(), Cas::Dir),
            Some(n) => (vec![n.body.clone()], n.cas),
        }
    }

    /// The body stored at `path`, or `None` for directories and missing
    /// paths.
    pub fn body_at(&self, path: &str) -> Option<String> {
        let (mut v, cas) = self.get(path);
        match cas {
            Cas::Missing | Cas::Dir => None,
            _ => Some(v.remove(0)),
        }
    }

    // Returns the replacement node and whether the parent should keep it.
    // Empty directories are pruned as deletes propagate upward.
    fn set(&self, parts: &[&str], body: &str, cas: Cas, keep: bool) -> (Node, bool) {
        match parts.split_first() {
            None => (
                Node {
                    body: body.to_string(),
                    cas,
                    children: self.children.clone(),
                },
                keep,
            ),
            Some((head, rest)) => {
                let mut children = self.children.clone();
                let child = children
                    .get(*head)
                    .map(|c| c.as_ref().clone())
                    .unwrap_or_else(Node::empty_dir);
                let (replacement, keep_child) = child.set(rest, body, cas, keep);
                if keep_child {
                    children.insert((*head).to_string(), Arc::new(replacement));
                } else {
                    children.remove(*head);
                }
                let keep_self = !children.is_empty();
                (
                    Node {
                        body: self.body.clone(),
                        cas: Cas::Dir,
                        children,
                    },
                    keep_self,
                )
            }
        }
    }

    // Validate that every ancestor of `parts` that exists is a directory.
    // Missing ancestors are fine: they are created implicitly.
    fn check_ancestors(&self, parts: &[&str]) -> Result<(), ConcordError> {
        for depth in 0..parts.len().saturating_sub(1) {
            match self.at(&parts[..=depth]) {
                None => break,
                Some(n) if n.is_dir() => continue,
                Some(_) => {
                    return Err(ConcordError::NotADirectory {
                        path: format!("/{}", parts[..=depth].join("/")),
                    })
                }
            }
        }
        Ok(())
    }

    /// Apply one encoded mutation at `seqn`, producing the replacement root
    /// and the event describing what happened.
    ///
    /// A CAS or path failure leaves the tree unchanged; the event carries
    /// the error and the path's *current* CAS token so a conditional caller
    /// can retry. The seqn is consumed either way.
    pub fn apply(self: &Arc<Node>, seqn: u64, encoded: &str) -> (Arc<Node>, Event) {
        let mut ev = Event {
            seqn,
            path: String::new(),
            body: String::new(),
            cas: Cas::Missing,
            mutation: encoded.to_string(),
            err: None,
            snapshot: Arc::clone(self),
        };

        let mutation = match Mutation::decode(encoded) {
            Ok(m) => m,
            Err(e) => {
                ev.err = Some(e);
                return (Arc::clone(self), ev);
            }
        };

        match mutation {
            Mutation::Nop => {
                ev.path = "/".to_string();
                ev.cas = Cas::Dir;
                (Arc::clone(self), ev)
            }
            Mutation::Set { path, body, cas } => {
                ev.path = path.clone();
                let parts = split_path(&path);
                let (_, current) = self.get(&path);
                if let Err(e) = self.check_ancestors(&parts) {
                    ev.err = Some(e);
                    ev.cas = current;
                    return (Arc::clone(self), ev);
                }
                if let Err(e) = check_write(cas, current, &path) {
                    ev.err = Some(e);
                    ev.cas = current;
                    return (Arc::clone(self), ev);
                }
                let (root, _) = self.set(&parts, &body, Cas::At(seqn), true);
                ev.body = body;
                ev.cas = Cas::At(seqn);
                let root = Arc::new(root);
                ev.snapshot = Arc::clone(&root);
                (root, ev)
            }
            Mutation::Del { path, cas } => {
                ev.path = path.clone();
                let parts = split_path(&path);
                let (_, current) = self.get(&path);
                if let Err(e) = check_write(cas, current, &path) {
                    ev.err = Some(e);
                    ev.cas = current;
                    return (Arc::clone(self), ev);
                }
                let (root, _) = self.set(&parts, "", Cas::Missing, false);
                ev.cas = Cas::Missing;
                let root = Arc::new(root);
                ev.snapshot = Arc::clone(&root);
                (root, ev)
            }
        }
    }
}

// The CAS policy: Clobber bypasses the comparison, anything else must equal
// the current token. Directories can never be written or deleted directly.
fn check_write(expected: Cas, current: Cas, path: &str) -> Result<(), ConcordError> {
    if current == Cas::Dir {
        return Err(ConcordError::IsADirectory {
            path: path.to_string(),
        });
    }
    if expected != Cas::Clobber && expected != current {
        return Err(ConcordError::CasMismatch { expected, current });
    }
    Ok(())
}

/// Visit every file under `root` in depth-first order.
pub fn walk(root: &Node, path: &str, visit: &mut dyn FnMut(&str, &str, Cas)) {
    let (values, cas) = root.get(path);
    match cas {
        Cas::Missing => {}
        Cas::Dir => {
            let prefix = if path == "/" { "" } else { path };
            for name in values {
                walk(root, &format!("{}/{}", prefix, name), visit);
            }
        }
        cas => visit(path, &values[0], cas),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn apply_all(muts: &[&str]) -> Arc<Node> {
        let mut root = Arc::new(Node::empty_dir());
        for (i, m) in muts.iter().enumerate() {
            let (next, ev) = root.apply(i as u64 + 1, m);
            assert!(ev.err.is_none(), "unexpected error: {:?}", ev.err);
            root = next;
        }
        root
    }

    #[test]
    fn set_and_get() {
        let root = apply_all(&[":/a/b=hello"]);
        assert_eq!(root.get("/a/b"), (vec!["hello".to_string()], Cas::At(1)));
        assert_eq!(root.get("/a").1, Cas::Dir);
        assert_eq!(root.get("/a").0, vec!["b".to_string()]);
    }

    #[test]
    fn missing_path() {
        let root = Arc::new(Node::empty_dir());
        assert_eq!(root.get("/nope"), (vec![String::new()], Cas::Missing));
    }

    #[test]
    fn cas_missing_requires_absence() {
        let root = apply_all(&["0:/a=1"]);
        let (next, ev) = root.apply(2, "0:/a=2");
        assert!(matches!(ev.err, Some(ConcordError::CasMismatch { .. })));
        // Prior CAS reported, tree unchanged.
        assert_eq!(ev.cas, Cas::At(1));
        assert_eq!(next.get("/a").0, vec!["1".to_string()]);
    }

    #[test]
    fn cas_token_gates_update() {
        let root = apply_all(&[":/a=1"]);
        let (root, ev) = root.apply(2, "1:/a=2");
        assert!(ev.err.is_none());
        assert_eq!(ev.cas, Cas::At(2));
        // Stale token now fails.
        let (_, ev) = root.apply(3, "1:/a=3");
        assert_eq!(
            ev.err,
            Some(ConcordError::CasMismatch {
                expected: Cas::At(1),
                current: Cas::At(2),
            })
        );
    }

    #[test]
    fn del_prunes_empty_dirs() {
        let root = apply_all(&[":/a/b/c=x"]);
        let (root, ev) = root.apply(2, ":/a/b/c");
        assert!(ev.err.is_none());
        assert_eq!(ev.cas, Cas::Missing);
        assert_eq!(root.get("/a/b/c").1, Cas::Missing);
        assert_eq!(root.get("/a").1, Cas::Missing);
    }

    #[test]
    fn del_keeps_populated_dirs() {
        let root = apply_all(&[":/a/b=x", ":/a/c=y"]);
        let (root, _) = root.apply(3, ":/a/b");
        assert_eq!(root.get("/a").1, Cas::Dir);
        assert_eq!(root.get("/a").0, vec!["c".to_string()]);
    }

    #[test]
    fn file_blocks_subpaths() {
        let root = apply_all(&[":/a=file"]);
        let (_, ev) = root.apply(2, ":/a/b=x");
        assert!(matches!(ev.err, Some(ConcordError::NotADirectory { .. })));
    }

    #[test]
    fn dir_cannot_be_written() {
        let root = apply_all(&[":/a/b=x"]);
        let (_, ev) = root.apply(2, ":/a=y");
        assert!(matches!(ev.err, Some(ConcordError::IsADirectory { .. })));
        let (_, ev) = root.apply(2, ":/a");
        assert!(matches!(ev.err, Some(ConcordError::IsADirectory { .. })));
    }

    #[test]
    fn snapshots_are_immutable() {
        let v1 = apply_all(&[":/a=1"]);
        let (v2, _) = v1.apply(2, "1:/a=2");
        assert_eq!(v1.get("/a").0, vec!["1".to_string()]);
        assert_eq!(v2.get("/a").0, vec!["2".to_string()]);
    }

    #[test]
    fn walk_visits_files() {
        let root = apply_all(&[":/a/b=1", ":/a/c=2", ":/d=3"]);
        let mut seen = Vec::new();
        walk(&root, "/", &mut |path, body, _| {
            seen.push((path.to_string(), body.to_string()));
        });
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("/a/b".to_string(), "1".to_string()),
                ("/a/c".to_string(), "2".to_string()),
                ("/d".to_string(), "3".to_string()),
            ]
        );
    }
}
