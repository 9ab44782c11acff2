//! Path pattern compilation and matching

use atlas_core::{Error, Result};
use std::fmt;

/// How a pattern extends past its literal prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// Exactly the literal
    Exact,
    /// The literal itself or anything below it (`/x/*`, `/x/**`)
    Subtree,
    /// Any path starting with the literal (`/x*`)
    Prefix,
}

/// A compiled route pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    literal: String,
    kind: PatternKind,
}

impl PathPattern {
    /// Compile a pattern, rejecting `*` anywhere but the end
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if !raw.starts_with('/') {
            return Err(Error::InvalidRoute(format!(
                "path pattern '{raw}' must start with '/'"
            )));
        }

        let stem = raw.trim_end_matches('*');
        let stars = raw.len() - stem.len();
        if stars > 2 || stem.contains('*') {
            return Err(Error::InvalidRoute(format!(
                "path pattern '{raw}' may only end in '*' or '**'"
            )));
        }

        let (literal, kind) = match (stars, stem.strip_suffix('/')) {
            (0, _) => (stem.to_string(), PatternKind::Exact),
            (_, Some(parent)) => (parent.to_string(), PatternKind::Subtree),
            (_, None) => (stem.to_string(), PatternKind::Prefix),
        };

        Ok(Self {
            raw: raw.to_string(),
            literal,
            kind,
        })
    }

    /// The pattern as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Literal prefix; empty for `/*`
    pub fn literal(&self) -> &str {
        &self.literal
    }

    /// Wildcard kind
    pub fn kind(&self) -> PatternKind {
        self.kind
    }

    /// Specificity used to rank matches
    pub fn specificity(&self) -> usize {
        self.literal.len()
    }

    /// Whether `path` matches
    pub fn matches(&self, path: &str) -> bool {
        match self.kind {
            PatternKind::Exact => path == self.literal,
            PatternKind::Prefix => path.starts_with(&self.literal),
            PatternKind::Subtree => match path.strip_prefix(&self.literal) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            },
        }
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Remove `prefix` from the front of `path`, keeping a leading `/`
pub fn strip_path_prefix(path: &str, prefix: &str) -> String {
    match path.strip_prefix(prefix) {
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        Some(rest) => format!("/{rest}"),
        None => path.to_string(),
    }
}
