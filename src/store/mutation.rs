//! Mutation encoding and CAS tokens.
//!
//! Mutations travel through consensus and the journal as strings:
//!
//! ```text
//! <cas>:<path>=<body>    set
//! <cas>:<path>           del
//! nop:                   no-op
//! ```
//!
//! The CAS token in the prefix is the condition under which the mutation
//! applies; the token a successful set produces is derived from the seqn it
//! was applied at.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;

use crate::core::error::{ConcordError, ConcordResult};

/// The no-op mutation. Consumes a seqn without changing the tree.
pub const NOP: &str = "nop:";

const PATH_PAT: &str = r"^/$|^(/[a-zA-Z0-9.-]+)+$";

fn path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PATH_PAT).expect("path pattern is valid"))
}

/// Verify that `path` is a legal store path.
pub fn check_path(path: &str) -> ConcordResult<()> {
    if path_re().is_match(path) {
        Ok(())
    } else {
        Err(ConcordError::BadPath {
            path: path.to_string(),
        })
    }
}

/// Split a path into its components. The root path has no components.
pub fn split_path(path: &str) -> Vec<&str> {
    if path == "/" {
        Vec::new()
    } else {
        path[1..].split('/').collect()
    }
}

/// A compare-and-swap token for a store path.
///
/// `At(seqn)` is the token of a file written at `seqn`. The sentinels:
/// `Clobber` skips the version check, `Missing` requires the path to not
/// exist, and `Dir` is reported for directories (it is never a valid
/// expectation for a write, since directories cannot be written directly).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Cas {
    /// Skip the version check entirely.
    Clobber,
    /// The path must not currently exist (or be tombstoned).
    #[default]
    Missing,
    /// The path is a directory.
    Dir,
    /// The path was last written at this seqn.
    At(u64),
}

impl fmt::Display for Cas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cas::Clobber => Ok(()),
            Cas::Missing => write!(f, "0"),
            Cas::Dir => write!(f, "dir"),
            Cas::At(seqn) => write!(f, "{}", seqn),
        }
    }
}

impl FromStr for Cas {
    type Err = ConcordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(Cas::Clobber),
            "0" => Ok(Cas::Missing),
            "dir" => Ok(Cas::Dir),
            _ => s.parse::<u64>().map(Cas::At).map_err(|_| {
                ConcordError::BadMutation {
                    mutation: s.to_string(),
                }
            }),
        }
    }
}

/// A decoded store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Set `path` to `body` iff its CAS matches `cas` at apply time.
    Set {
        path: String,
        body: String,
        cas: Cas,
    },
    /// Delete `path` iff its CAS matches `cas` at apply time.
    Del { path: String, cas: Cas },
    /// Change nothing; still consumes a seqn.
    Nop,
}

impl Mutation {
    /// The path this mutation addresses, if any.
    pub fn path(&self) -> Option<&str> {
        match self {
            Mutation::Set { path, .. } | Mutation::Del { path, .. } => Some(path),
            Mutation::Nop => None,
        }
    }

    /// Encode to the wire/journal string form.
    pub fn encode(&self) -> String {
        match self {
            Mutation::Set { path, body, cas } => format!("{}:{}={}", cas, path, body),
            Mutation::Del { path, cas } => format!("{}:{}", cas, path),
            Mutation::Nop => NOP.to_string(),
        }
    }

    /// Decode a mutation string. A malformed string is a `BadMutation`
    /// error: the record is reported and not guessed at.
    pub fn decode(s: &str) -> ConcordResult<Mutation> {
        if s == NOP {
            return Ok(Mutation::Nop);
        }

        let (cas_str, rest) = s.split_once(':').ok_or_else(|| ConcordError::BadMutation {
            mutation: s.to_string(),
        })?;
        let cas: Cas = cas_str.parse().map_err(|_| ConcordError::BadMutation {
            mutation: s.to_string(),
        })?;

        match rest.split_once('=') {
            Some((path, body)) => {
                check_path(path)?;
                Ok(Mutation::Set {
                    path: path.to_string(),
                    body: body.to_string(),
                    cas,
                })
            }
            None => {
                check_path(rest)?;
                Ok(Mutation::Del {
                    path: rest.to_string(),
                    cas,
                })
            }
        }
    }
}

/// Encode a set mutation, validating the path first.
pub fn encode_set(path: &str, body: &str, cas: Cas) -> ConcordResult<String> {
    check_path(path)?;
    Ok(Mutation::Set {
        path: path.to_string(),
        body: body.to_string(),
        cas,
    }
    .encode())
}

/// Encode a del mutation, validating the path first.
pub fn encode_del(path: &str, cas: Cas) -> ConcordResult<String> {
    check_path(path)?;
    Ok(Mutation::Del {
        path: path.to_string(),
        cas,
    }
    .encode())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_legality() {
        assert!(check_path("/").is_ok());
        assert!(check_path("/a").is_ok());
        assert!(check_path("/a/b.c-d/e0").is_ok());
        assert!(check_path("").is_err());
        assert!(check_path("a/b").is_err());
        assert!(check_path("/a/").is_err());
        assert!(check_path("//x").is_err());
        assert!(check_path("/a b").is_err());
    }

    #[test]
    fn cas_round_trip() {
        for cas in [Cas::Clobber, Cas::Missing, Cas::Dir, Cas::At(42)] {
            let s = cas.to_string();
            assert_eq!(s.parse::<Cas>().unwrap(), cas);
        }
    }

    #[test]
    fn encode_forms() {
        assert_eq!(encode_set("/a/b", "v", Cas::Clobber).unwrap(), ":/a/b=v");
        assert_eq!(encode_set("/a/b", "v", Cas::Missing).unwrap(), "0:/a/b=v");
        assert_eq!(encode_set("/a/b", "v", Cas::At(7)).unwrap(), "7:/a/b=v");
        assert_eq!(encode_del("/a/b", Cas::At(7)).unwrap(), "7:/a/b");
    }

    #[test]
    fn decode_forms() {
        assert_eq!(
            Mutation::decode(":/a=x").unwrap(),
            Mutation::Set {
                path: "/a".into(),
                body: "x".into(),
                cas: Cas::Clobber,
            }
        );
        assert_eq!(
            Mutation::decode("3:/a").unwrap(),
            Mutation::Del {
                path: "/a".into(),
                cas: Cas::At(3),
            }
        );
        assert_eq!(Mutation::decode("nop:").unwrap(), Mutation::Nop);
    }

    #[test]
    fn decode_preserves_body_with_equals() {
        // Only the first '=' separates path from body.
        let m = Mutation::decode(":/a=x=y").unwrap();
        assert_eq!(
            m,
            Mutation::Set {
                path: "/a".into(),
                body: "x=y".into(),
                cas: Cas::Clobber,
            }
        );
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Mutation::decode("").is_err());
        assert!(Mutation::decode("no-colon").is_err());
        assert!(Mutation::decode("x:/bad path=1").is_err());
    }
}
