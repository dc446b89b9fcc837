//! Hierarchical stage addresses.

use crate::errors::{FormatError, StagetreeError, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separators accepted when parsing a path string.
const SEPARATORS: &[char] = &['-', ',', '.', '_', '|', ' '];

/// The address of a stage inside a job tree.
///
/// A path is an ordered sequence of 1-based sibling positions; the root is
/// `1` and a child appends its position under its parent, so `1-2-3` is the
/// third child of the second child of the root. The empty path addresses no
/// stage and is only meaningful on run requests that target nothing.
///
/// Paths are immutable values: equality, hashing and ordering are purely
/// structural. The derived ordering compares segment by segment and places a
/// strict prefix before its extensions, so a parent always sorts before its
/// children and siblings sort by position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StagePath {
    segments: Vec<u32>,
}

impl StagePath {
    /// Returns the empty path.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the root path `1`.
    #[must_use]
    pub fn root() -> Self {
        Self { segments: vec![1] }
    }

    /// Creates a path from raw segments.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if any segment is zero; sibling
    /// positions are 1-based.
    pub fn new(segments: impl IntoIterator<Item = u32>) -> Result<Self, ValidationError> {
        let segments: Vec<u32> = segments.into_iter().collect();
        for segment in &segments {
            validate_segment(*segment)?;
        }
        Ok(Self { segments })
    }

    /// Returns the address of the child at the given 1-based position.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if `index` is zero.
    pub fn child(&self, index: u32) -> Result<Self, ValidationError> {
        validate_segment(index)?;
        Ok(self.append(index))
    }

    /// Appends a sibling position known to be valid.
    pub(crate) fn append(&self, index: u32) -> Self {
        let mut segments = self.segments.clone();
        segments.push(index);
        Self { segments }
    }

    /// Returns the parent path, or `None` for the empty path and the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Returns the path's segments.
    #[must_use]
    pub fn segments(&self) -> &[u32] {
        &self.segments
    }

    /// Returns the number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Returns true for the empty path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the last sibling position, or 0 for the empty path.
    #[must_use]
    pub fn index(&self) -> u32 {
        self.segments.last().copied().unwrap_or(0)
    }

    /// Returns true if this path is a strict ancestor of `other`.
    ///
    /// A path is never an ancestor of itself.
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.segments.len() < other.segments.len()
            && other.segments.starts_with(&self.segments)
    }

    /// Returns true if this path is a strict descendant of `other`.
    #[must_use]
    pub fn is_descendant_of(&self, other: &Self) -> bool {
        other.is_ancestor_of(self)
    }

    /// Returns true if this path is the direct parent of `other`.
    #[must_use]
    pub fn is_parent_of(&self, other: &Self) -> bool {
        self.segments.len() + 1 == other.segments.len()
            && other.segments.starts_with(&self.segments)
    }

    /// Returns true if this path is a direct child of `other`.
    #[must_use]
    pub fn is_child_of(&self, other: &Self) -> bool {
        other.is_parent_of(self)
    }

    /// Parses a path from a string.
    ///
    /// Accepts `-`, `,`, `.`, `_`, `|` or a space between segments; the
    /// canonical form produced by [`fmt::Display`] joins segments with `-`.
    /// An empty or all-whitespace string yields the empty path.
    ///
    /// # Errors
    ///
    /// Returns [`StagetreeError::Format`] for a non-numeric segment and
    /// [`StagetreeError::Validation`] for a zero segment.
    pub fn parse(input: &str) -> Result<Self, StagetreeError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::empty());
        }
        let mut segments = Vec::new();
        for raw in trimmed.split(SEPARATORS) {
            let value: u32 = raw
                .parse()
                .map_err(|_| FormatError::new(input, raw))?;
            segments.push(value);
        }
        Ok(Self::new(segments)?)
    }
}

fn validate_segment(segment: u32) -> Result<(), ValidationError> {
    if segment < 1 {
        return Err(ValidationError::new(
            "a stage path segment cannot be less than one",
        ));
    }
    Ok(())
}

impl fmt::Display for StagePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "-")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for StagePath {
    type Err = StagetreeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
