//! Path addressing into a Host object graph.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest index an array segment may name (2^32 - 2).
pub const MAX_ARRAY_INDEX: u32 = u32::MAX - 1;

/// Longest array either side will grow to. Arrays are dense in memory, so
/// writes that would grow one past this are refused.
pub const MAX_DENSE_LENGTH: usize = 1 << 24;

/// Parse a segment as an array index.
///
/// Non-canonical forms (`+1`, `01`) and segments outside
/// `0..=MAX_ARRAY_INDEX` are ordinary property names.
#[must_use]
pub fn array_index(segment: &str) -> Option<usize> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if segment.len() > 1 && segment.starts_with('0') {
        return None;
    }
    segment
        .parse::<u32>()
        .ok()
        .filter(|index| *index <= MAX_ARRAY_INDEX)
        .and_then(|index| usize::try_from(index).ok())
}

/// Ordered property-name segments rooted at the Host's root object.
///
/// Array indices are carried as decimal strings, so `["items", "0"]`
/// addresses the first element of `items`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(Vec<String>);

impl Path {
    /// The empty path, addressing the root object itself.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse a dotted path such as `nested.echo`.
    ///
    /// Empty input yields the root path.
    #[must_use]
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::root();
        }
        Self(dotted.split('.').map(str::to_owned).collect())
    }

    /// Path extended by one segment.
    #[must_use]
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Self(segments)
    }

    /// Path extended by an array index.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        self.child(index.to_string())
    }

    /// Path minus its last segment, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0
            .split_last()
            .map(|(_, rest)| Self(rest.to_vec()))
    }

    /// Last segment, or `None` for the root.
    #[must_use]
    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl<S: Into<String>> FromIterator<S> for Path {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<String>> for Path {
    fn from(segments: Vec<String>) -> Self {
        Self(segments)
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_and_parent() {
        let path = Path::root().child("nested").child("echo");
        assert_eq!(path.len(), 2);
        assert_eq!(path.last(), Some("echo"));
        assert_eq!(path.parent(), Some(Path::parse("nested")));
        assert_eq!(Path::root().parent(), None);
    }

    #[test]
    fn test_index_segments_are_strings() {
        let path = Path::parse("items").index(3);
        assert_eq!(path.segments(), ["items".to_string(), "3".to_string()]);
        assert_eq!(path.to_string(), "items.3");
    }

    #[test]
    fn test_serializes_as_plain_array() {
        let path = Path::parse("a.b");
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"["a","b"]"#);

        let parsed: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, path);
    }

    #[test]
    fn test_array_index_range() {
        assert_eq!(array_index("0"), Some(0));
        assert_eq!(array_index("4294967294"), Some(4_294_967_294));
        assert_eq!(array_index("4294967295"), None);
        assert_eq!(array_index("18446744073709551615"), None);
        assert_eq!(array_index("01"), None);
        assert_eq!(array_index("+1"), None);
        assert_eq!(array_index("length"), None);
    }

    #[test]
    fn test_parse_empty_is_root() {
        assert!(Path::parse("").is_empty());
    }
}
