//! Routing paths through the cell hierarchy.
//!
//! A routing path is the ordered list of cell names a request has
//! traveled, rendered top-down and joined with `!`:
//!
//! ```text
//! api!region1!child3
//! ```

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Separator between cell names in a rendered path.
pub const PATH_SEPARATOR: char = '!';

/// Alternative separator accepted from command-line hints, where `!` is awkward.
pub const HINT_SEPARATOR: char = '-';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("empty routing path")]
    Empty,
    #[error("routing path {0:?} contains an empty segment")]
    EmptySegment(String),
}

/// An ordered sequence of cell names, top of the tree first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct RoutingPath {
    segments: Vec<String>,
}

impl RoutingPath {
    /// A path consisting of a single (root) cell.
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            segments: vec![name.into()],
        }
    }

    /// Parse a `!`-separated path.
    pub fn parse(path: &str) -> Result<Self, RoutingError> {
        if path.trim().is_empty() {
            return Err(RoutingError::Empty);
        }
        let segments: Vec<String> = path.split(PATH_SEPARATOR).map(str::to_string).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(RoutingError::EmptySegment(path.to_string()));
        }
        Ok(Self { segments })
    }

    /// Parse a path given as a scheduler hint, where either separator is allowed.
    pub fn from_hint(hint: &str) -> Result<Self, RoutingError> {
        Self::parse(&hint.replace(HINT_SEPARATOR, &PATH_SEPARATOR.to_string()))
    }

    /// The path to a direct child of the cell this path ends at.
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(name.to_string());
        Self { segments }
    }

    pub fn push(&mut self, name: impl Into<String>) {
        self.segments.push(name.into());
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Name of the cell this path ends at.
    pub fn last(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// True when `prefix` is an ancestor of (or equal to) this path.
    pub fn starts_with(&self, prefix: &RoutingPath) -> bool {
        self.segments.starts_with(&prefix.segments)
    }
}

impl std::fmt::Display for RoutingPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sep = PATH_SEPARATOR.to_string();
        write!(f, "{}", self.segments.join(&sep))
    }
}

impl std::str::FromStr for RoutingPath {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RoutingPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for RoutingPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_render() {
        let path = RoutingPath::parse("api!region1!child3").unwrap();
        assert_eq!(path.segments(), &["api", "region1", "child3"]);
        assert_eq!(path.last(), Some("child3"));
        assert_eq!(path.to_string(), "api!region1!child3");
    }

    #[test]
    fn hint_accepts_dashes() {
        let path = RoutingPath::from_hint("api-region1").unwrap();
        assert_eq!(path, RoutingPath::parse("api!region1").unwrap());
    }

    #[test]
    fn rejects_empty_segments() {
        assert_eq!(RoutingPath::parse(""), Err(RoutingError::Empty));
        assert!(matches!(
            RoutingPath::parse("api!!child"),
            Err(RoutingError::EmptySegment(_))
        ));
    }

    #[test]
    fn child_extends_path() {
        let root = RoutingPath::root("api");
        let child = root.child("child1");
        assert_eq!(child.to_string(), "api!child1");
        assert!(child.starts_with(&root));
        assert!(!root.starts_with(&child));
    }

    #[test]
    fn serializes_as_string() {
        let path = RoutingPath::parse("api!child1").unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"api!child1\"");
        let back: RoutingPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
