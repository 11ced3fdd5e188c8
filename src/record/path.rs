//! Dotted column paths.

use std::fmt;

/// A non-empty sequence of field names descending through nested groups.
///
/// Parsed from dotted notation: `"user.address.postcode"` names the
/// `postcode` field inside the `address` group inside the `user` group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnPath {
    parts: Vec<String>,
}

impl ColumnPath {
    /// Parse a dotted path. A name without dots is a single-component path.
    pub fn parse(dotted: &str) -> Self {
        Self {
            parts: dotted.split('.').map(str::to_owned).collect(),
        }
    }

    /// Build a path from explicit components. Must be non-empty.
    pub fn new(parts: Vec<String>) -> Self {
        assert!(!parts.is_empty(), "column path must be non-empty");
        Self { parts }
    }

    /// The first component.
    pub fn head(&self) -> &str {
        &self.parts[0]
    }

    /// The path past the first component, or `None` for a leaf path.
    pub fn tail(&self) -> Option<ColumnPath> {
        if self.parts.len() > 1 {
            Some(ColumnPath {
                parts: self.parts[1..].to_vec(),
            })
        } else {
            None
        }
    }

    /// True when the path is a single field name.
    pub fn is_leaf(&self) -> bool {
        self.parts.len() == 1
    }
}

impl fmt::Display for ColumnPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

impl From<&str> for ColumnPath {
    fn from(dotted: &str) -> Self {
        Self::parse(dotted)
    }
}

impl From<String> for ColumnPath {
    fn from(dotted: String) -> Self {
        Self::parse(&dotted)
    }
}
