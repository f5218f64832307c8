//! Hold list for generation-deferred frees

use super::generation::Generation;
use crate::error::{Error, Result};
use std::collections::VecDeque;

/// Queue of `(item, generation_at_free)` pairs
///
/// Items are inserted in non-decreasing generation order, so reclaiming is
/// a pop from the front until the first item that is still visible.
#[derive(Debug)]
pub struct GenerationHoldList<T> {
    held: VecDeque<(T, Generation)>,
}

impl<T> Default for GenerationHoldList<T> {
    fn default() -> Self {
        Self {
            held: VecDeque::new(),
        }
    }
}

impl<T> GenerationHoldList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `item`, freed by the writer at `generation`
    pub fn insert(&mut self, item: T, generation: Generation) -> Result<()> {
        self.check_insert(generation)?;
        self.held.push_back((item, generation));
        Ok(())
    }

    /// Fail if an item held at `generation` would break generation order
    pub fn check_insert(&self, generation: Generation) -> Result<()> {
        if let Some(&(_, last)) = self.held.back() {
            if generation < last {
                return Err(Error::Internal(format!(
                    "hold list generation went backwards ({} after {})",
                    generation, last
                )));
            }
        }
        Ok(())
    }

    /// Remove and return every item held at a generation strictly below
    /// `oldest_used`
    pub fn reclaim(&mut self, oldest_used: Generation) -> Vec<T> {
        let mut released = Vec::new();
        while let Some(&(_, generation)) = self.held.front() {
            if generation >= oldest_used {
                break;
            }
            if let Some((item, _)) = self.held.pop_front() {
                released.push(item);
            }
        }
        released
    }

    /// Generation of the oldest held item
    pub fn oldest_held(&self) -> Option<Generation> {
        self.held.front().map(|&(_, generation)| generation)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(T, Generation)> {
        self.held.iter()
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reclaim_strictly_below() -> Result<()> {
        let mut list = GenerationHoldList::new();
        list.insert("a", 1)?;
        list.insert("b", 2)?;
        list.insert("c", 2)?;
        list.insert("d", 5)?;

        assert!(list.reclaim(1).is_empty());
        assert_eq!(list.reclaim(2), vec!["a"]);
        assert_eq!(list.oldest_held(), Some(2));
        assert_eq!(list.reclaim(5), vec!["b", "c"]);
        assert_eq!(list.len(), 1);
        assert_eq!(list.reclaim(100), vec!["d"]);
        assert!(list.is_empty());
        Ok(())
    }

    #[test]
    fn test_rejects_backwards_generation() -> Result<()> {
        let mut list = GenerationHoldList::new();
        list.insert(1u32, 4)?;
        let err = list.insert(2u32, 3).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(list.len(), 1);

        assert!(list.check_insert(3).is_err());
        list.check_insert(4)?;
        assert_eq!(list.len(), 1);
        Ok(())
    }
}
