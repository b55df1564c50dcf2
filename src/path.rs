//! Dotted paths, addressed from the root of a tracked value (spec §3).
//!
//! A path is a sequence of attribute-name or sequence-index segments. The
//! root is the empty path, which renders as `""`. Internally we keep the
//! parsed segment list rather than the raw string so `Delta`'s maps can use
//! `Path` as a `BTreeMap` key with sane `Ord`/`Hash` semantics; the dotted
//! string is only materialized at the API boundary via `Display`/`FromStr`.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Key(k) => f.write_str(k),
            Segment::Index(i) => write!(f, "{i}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Path(pub Vec<Segment>);

impl Path {
    pub fn root() -> Self {
        Path(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn key(name: impl Into<String>) -> Self {
        Path(vec![Segment::Key(name.into())])
    }

    pub fn index(i: usize) -> Self {
        Path(vec![Segment::Index(i)])
    }

    /// Append a segment, returning the extended path (e.g. `nested` + `foo`
    /// -> `nested.foo`, matching S2 in spec.md §8).
    pub fn join_key(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Key(name.into()));
        Path(segments)
    }

    pub fn join_index(&self, i: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(Segment::Index(i));
        Path(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        let mut first = true;
        for seg in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            first = false;
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePathError(pub String);

impl fmt::Display for ParsePathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid path: {}", self.0)
    }
}

impl std::error::Error for ParsePathError {}

impl FromStr for Path {
    type Err = ParsePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Path::root());
        }
        let mut segments = Vec::new();
        for part in s.split('.') {
            if part.is_empty() {
                return Err(ParsePathError(s.to_string()));
            }
            if let Ok(i) = part.parse::<usize>() {
                segments.push(Segment::Index(i));
            } else {
                segments.push(Segment::Key(part.to_string()));
            }
        }
        Ok(Path(segments))
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        s.parse().expect("invalid path literal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_path_displays_empty() {
        assert_eq!(Path::root().to_string(), "");
    }

    #[test]
    fn nested_key_round_trips() {
        let p: Path = "nested.foo".into();
        assert_eq!(p.to_string(), "nested.foo");
        assert_eq!(p, Path::key("nested").join_key("foo"));
    }

    #[test]
    fn index_segment_round_trips() {
        let p: Path = "items.1".into();
        assert_eq!(p, Path::key("items").join_index(1));
        assert_eq!(p.to_string(), "items.1");
    }
}
