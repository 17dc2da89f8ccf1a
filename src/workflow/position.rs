//! Multi-index positions into a task chain

use crate::error::WorkflowError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Path to a task unit: one index per branch depth.
///
/// Ordering is lexicographic over the indices, so `[3] < [3, 1] < [4]`.
/// Serialized as a JSON array; rendered as a dotted key (`"3.1"`) wherever
/// it has to be a map key, e.g. for drafts.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(Vec<usize>);

impl Position {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    /// Position of the first unit of a chain
    pub fn start() -> Self {
        Self(vec![0])
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Index at the innermost depth
    pub fn step(&self) -> usize {
        self.0.last().copied().unwrap_or(0)
    }

    /// Move `delta` siblings at the innermost depth, clamping at zero
    pub fn shifted(&self, delta: isize) -> Self {
        let mut indices = self.0.clone();
        match indices.last_mut() {
            Some(last) => {
                *last = last.saturating_add_signed(delta);
            }
            None => indices.push(delta.max(0) as usize),
        }
        Self(indices)
    }

    /// First child of the unit at this position
    pub fn child(&self, index: usize) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    /// Position of the enclosing branch, `None` at the top level
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Dotted key form, `[3, 1]` -> `"3.1"`
    pub fn to_key(&self) -> String {
        self.0
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Parse a dotted key; returns `None` for anything that is not one
    pub fn parse_key(key: &str) -> Option<Self> {
        if key.is_empty() {
            return None;
        }
        key.split('.')
            .map(|part| part.trim().parse::<usize>().ok())
            .collect::<Option<Vec<_>>>()
            .map(Self)
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::start()
    }
}

impl From<Vec<usize>> for Position {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.to_key().replace('.', ", "))
    }
}

impl FromStr for Position {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
        Self::parse_key(&trimmed.replace(',', ".").replace(' ', ""))
            .ok_or_else(|| WorkflowError::validation(format!("invalid position '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_lexicographic() {
        let mut positions = vec![
            Position::new(vec![4]),
            Position::new(vec![3, 1]),
            Position::new(vec![3]),
            Position::new(vec![10]),
            Position::new(vec![0, 2, 1]),
        ];
        positions.sort();
        let keys: Vec<_> = positions.iter().map(|p| p.to_key()).collect();
        assert_eq!(keys, vec!["0.2.1", "3", "3.1", "4", "10"]);
    }

    #[test]
    fn test_key_round_trip_and_rejects() {
        assert_eq!(Position::parse_key("3.1"), Some(Position::new(vec![3, 1])));
        assert_eq!(Position::parse_key("12"), Some(Position::new(vec![12])));
        assert_eq!(Position::parse_key(""), None);
        assert_eq!(Position::parse_key("a.1"), None);
        assert_eq!(Position::parse_key("1..2"), None);
    }

    #[test]
    fn test_shifted_clamps_at_zero() {
        let pos = Position::new(vec![2, 1]);
        assert_eq!(pos.shifted(2), Position::new(vec![2, 3]));
        assert_eq!(pos.shifted(-5), Position::new(vec![2, 0]));
    }

    #[test]
    fn test_parent_and_child() {
        let pos = Position::new(vec![2, 1]);
        assert_eq!(pos.parent(), Some(Position::new(vec![2])));
        assert_eq!(Position::start().parent(), None);
        assert_eq!(Position::new(vec![2]).child(0), Position::new(vec![2, 0]));
    }

    #[test]
    fn test_display_and_from_str() {
        let pos = Position::new(vec![3, 1]);
        assert_eq!(pos.to_string(), "[3, 1]");
        assert_eq!("[3, 1]".parse::<Position>().unwrap(), pos);
        assert_eq!("3.1".parse::<Position>().unwrap(), pos);
        assert!("nope".parse::<Position>().is_err());
    }

    #[test]
    fn test_serializes_as_array() {
        let json = serde_json::to_string(&Position::new(vec![1, 2])).unwrap();
        assert_eq!(json, "[1,2]");
        let back: Position = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Position::new(vec![1, 2]));
    }
}
