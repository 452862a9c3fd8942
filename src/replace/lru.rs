use crate::cache::Line;

use super::Replace;

/// Least recently used, found with a linear scan of the set.
///
/// A vacant way always wins over an occupied one, so a set only evicts once
/// all of its ways have been filled.
#[derive(Debug, Default)]
pub struct Lru {}

impl Lru {
    pub fn new() -> Self {
        Lru {}
    }
}

impl Replace for Lru {
    fn victim(&mut self, set: &[Line]) -> usize {
        // Empty block, no eviction needed
        if let Some(way) = set.iter().position(|line| !line.valid) {
            return way;
        }
        // min_by_key keeps the first of equal keys, so ties go to the lowest way
        set.iter()
            .enumerate()
            .min_by_key(|(_way, line)| line.last_used)
            .map(|(way, _line)| way)
            .unwrap_or(0)
    }
}
