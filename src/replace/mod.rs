pub mod lru;

use crate::cache::Line;

/// Picks the way a missing block is placed into.
pub trait Replace {
    /// `set` is never empty. The returned way must index into it.
    fn victim(&mut self, set: &[Line]) -> usize;
}
