//! Glob patterns for watch registrations.
//!
//! Glob notation:
//! - `?` matches a single char in a single path component
//! - `*` matches zero or more chars in a single path component
//! - `**` matches zero or more chars in zero or more components
//! - any other sequence matches itself

use regex::Regex;

use crate::core::error::{ConcordError, ConcordResult};

/// A glob pattern in compiled form for efficient matching against paths.
#[derive(Debug, Clone)]
pub struct Glob {
    pattern: String,
    re: Regex,
}

fn translate(pat: &str) -> String {
    let mut out = String::with_capacity(pat.len() + 8);
    out.push('^');
    let mut double = false;
    for c in pat.chars() {
        match c {
            '.' | '+' | '-' | '^' | '$' | '[' | ']' | '(' | ')' | '{' | '}' | '|' | '\\' => {
                out.push('\\');
                out.push(c);
                double = false;
            }
            '?' => {
                out.push_str("[^/]");
                double = false;
            }
            '*' => {
                if double {
                    // The previous '*' emitted "[^/]*"; widen it to ".*".
                    out.truncate(out.len() - 5);
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
                double = !double;
            }
            _ => {
                out.push(c);
                double = false;
            }
        }
    }
    out.push('$');
    out
}

impl Glob {
    /// Compile `pattern` for matching against store paths.
    pub fn compile(pattern: &str) -> ConcordResult<Glob> {
        let re = Regex::new(&translate(pattern)).map_err(|_| ConcordError::BadPath {
            path: pattern.to_string(),
        })?;
        Ok(Glob {
            pattern: pattern.to_string(),
            re,
        })
    }

    /// The original pattern text.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// True if `path` matches this pattern.
    pub fn matches(&self, path: &str) -> bool {
        self.re.is_match(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(pat: &str, path: &str) -> bool {
        Glob::compile(pat).unwrap().matches(path)
    }

    #[test]
    fn literal() {
        assert!(m("/a/b", "/a/b"));
        assert!(!m("/a/b", "/a/c"));
        assert!(!m("/a/b", "/a/b/c"));
    }

    #[test]
    fn single_star_stays_in_component() {
        assert!(m("/a/*", "/a/b"));
        assert!(m("/a/*", "/a/bcd"));
        assert!(!m("/a/*", "/a/b/c"));
        assert!(!m("/a/*", "/b/c"));
    }

    #[test]
    fn double_star_crosses_components() {
        assert!(m("/a/**", "/a/b"));
        assert!(m("/a/**", "/a/b/c/d"));
        assert!(!m("/a/**", "/b/c"));
        assert!(m("/**", "/anything/at/all"));
    }

    #[test]
    fn question_mark() {
        assert!(m("/a/?", "/a/b"));
        assert!(!m("/a/?", "/a/bc"));
        assert!(!m("/a/?", "/a/"));
    }

    #[test]
    fn dots_are_literal() {
        assert!(m("/a.b", "/a.b"));
        assert!(!m("/a.b", "/aXb"));
    }

    #[test]
    fn applied_namespace() {
        let g = Glob::compile("/ctl/node/*/applied").unwrap();
        assert!(g.matches("/ctl/node/n1/applied"));
        assert!(!g.matches("/ctl/node/n1/other"));
        assert!(!g.matches("/ctl/node/n1/x/applied"));
    }
}
