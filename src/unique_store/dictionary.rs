//! Ordered dictionary of distinct unique store entries

use super::comparator::EntryComparator;
use crate::datastore::EntryRef;
use crate::error::{Error, Result};

/// Sorted index of entry refs, ordered by the values they point at
///
/// The refs themselves carry no order; every search goes through an
/// [`EntryComparator`]. Reference counts live in the stored entries, not
/// here.
#[derive(Debug, Default, Clone)]
pub struct Dictionary {
    refs: Vec<EntryRef>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binary search for `probe`
    ///
    /// `Ok(index)` when an equal entry exists, otherwise `Err(index)` with
    /// the insertion point that keeps the dictionary sorted.
    pub fn find<C>(&self, cmp: &C, probe: EntryRef) -> Result<std::result::Result<usize, usize>>
    where
        C: EntryComparator + ?Sized,
    {
        // Lower bound: first entry not less than the probe
        let (mut lo, mut hi) = (0, self.refs.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if cmp.less(self.refs[mid], probe)? {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo < self.refs.len() && !cmp.less(probe, self.refs[lo])? {
            Ok(Ok(lo))
        } else {
            Ok(Err(lo))
        }
    }

    pub fn get(&self, index: usize) -> Option<EntryRef> {
        self.refs.get(index).copied()
    }

    /// Insert at a position returned by [`find`](Self::find)
    pub fn insert_at(&mut self, index: usize, entry: EntryRef) -> Result<()> {
        if index > self.refs.len() {
            return Err(Error::Internal(format!(
                "dictionary insert at {} beyond {} entries",
                index,
                self.refs.len()
            )));
        }
        self.refs.insert(index, entry);
        Ok(())
    }

    /// Remove `entry`, located through its own value. Returns `false` when
    /// the value is present under a different ref or not at all.
    pub fn remove<C>(&mut self, cmp: &C, entry: EntryRef) -> Result<bool>
    where
        C: EntryComparator + ?Sized,
    {
        match self.find(cmp, entry)? {
            Ok(index) if self.refs[index] == entry => {
                self.refs.remove(index);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Rewrite every key through `remap`
    ///
    /// Only valid when each new ref points at a value equal to the old one,
    /// as after compaction, so the order is unchanged.
    pub fn remap(&mut self, remap: impl Fn(EntryRef) -> EntryRef) {
        for entry in &mut self.refs {
            *entry = remap(*entry);
        }
    }

    /// Refs in value order
    pub fn iter(&self) -> impl Iterator<Item = EntryRef> + '_ {
        self.refs.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    /// Check that neighbouring entries are strictly increasing
    pub fn verify<C>(&self, cmp: &C) -> Result<()>
    where
        C: EntryComparator + ?Sized,
    {
        for pair in self.refs.windows(2) {
            if !cmp.less(pair[0], pair[1])? {
                return Err(Error::Internal(format!(
                    "dictionary out of order at {} / {}",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::{BufferTypeConfig, DataStore};
    use crate::unique_store::comparator::UniqueStoreComparator;
    use crate::unique_store::entry::UniqueStoreEntry;

    fn store_with(values: &[i64]) -> Result<(DataStore, Vec<EntryRef>)> {
        let mut store = DataStore::new();
        let type_id = store.add_type::<UniqueStoreEntry<i64>>(BufferTypeConfig::with_capacity(64))?;
        let refs = values
            .iter()
            .map(|&v| store.allocate(type_id, UniqueStoreEntry::new(v)))
            .collect::<Result<Vec<_>>>()?;
        Ok((store, refs))
    }

    #[test]
    fn test_insert_keeps_order() -> Result<()> {
        let (store, refs) = store_with(&[30, 10, 20])?;
        let cmp = UniqueStoreComparator::<i64>::new(&store);
        let mut dict = Dictionary::new();

        for &r in &refs {
            let index = dict.find(&cmp, r)?.unwrap_err();
            dict.insert_at(index, r)?;
        }
        assert_eq!(dict.iter().collect::<Vec<_>>(), vec![refs[1], refs[2], refs[0]]);
        dict.verify(&cmp)?;
        assert_eq!(dict.find(&cmp, refs[2])?, Ok(1));
        Ok(())
    }

    #[test]
    fn test_probe_with_fallback() -> Result<()> {
        let (store, refs) = store_with(&[10, 20])?;
        let mut dict = Dictionary::new();
        {
            let cmp = UniqueStoreComparator::<i64>::new(&store);
            for &r in &refs {
                let index = dict.find(&cmp, r)?.unwrap_err();
                dict.insert_at(index, r)?;
            }
        }

        let present = 20i64;
        let cmp = UniqueStoreComparator::with_fallback(&store, &present);
        assert_eq!(dict.find(&cmp, EntryRef::invalid())?, Ok(1));

        let absent = 15i64;
        let cmp = UniqueStoreComparator::with_fallback(&store, &absent);
        assert_eq!(dict.find(&cmp, EntryRef::invalid())?, Err(1));

        let largest = 99i64;
        let cmp = UniqueStoreComparator::with_fallback(&store, &largest);
        assert_eq!(dict.find(&cmp, EntryRef::invalid())?, Err(2));
        Ok(())
    }

    #[test]
    fn test_remove_requires_same_ref() -> Result<()> {
        let (store, refs) = store_with(&[10, 20, 20])?;
        let cmp = UniqueStoreComparator::<i64>::new(&store);
        let mut dict = Dictionary::new();
        for &r in &refs[..2] {
            let index = dict.find(&cmp, r)?.unwrap_err();
            dict.insert_at(index, r)?;
        }

        // refs[2] has an equal value but is not the indexed ref
        assert!(!dict.remove(&cmp, refs[2])?);
        assert!(dict.remove(&cmp, refs[1])?);
        assert!(!dict.remove(&cmp, refs[1])?);
        assert_eq!(dict.len(), 1);
        Ok(())
    }

    #[test]
    fn test_insert_out_of_range() {
        let mut dict = Dictionary::new();
        assert!(dict.insert_at(1, EntryRef::pack(0, 0)).is_err());
        assert!(dict.is_empty());
    }

    #[test]
    fn test_verify_detects_disorder() -> Result<()> {
        let (store, refs) = store_with(&[2, 1])?;
        let cmp = UniqueStoreComparator::<i64>::new(&store);
        let mut dict = Dictionary::new();
        dict.insert_at(0, refs[0])?;
        dict.insert_at(1, refs[1])?;
        assert!(dict.verify(&cmp).is_err());
        Ok(())
    }
}
