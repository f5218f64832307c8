//! Unique store: deduplicating, reference-counted value storage

use super::comparator::{UniqueStoreComparator, UniqueStoreValue};
use super::dictionary::Dictionary;
use super::entry::UniqueStoreEntry;
use crate::datastore::{
    BufferTypeConfig, CapacityStats, Compaction, DataStore, EntryRef, GenerationGuard,
    GenerationHandler, TypeId,
};
use crate::error::{Error, Result};
use std::marker::PhantomData;
use tracing::{debug, info, warn};

/// Stores each distinct value once and hands out a shared [`EntryRef`]
///
/// Equal values (per [`UniqueStoreValue::less`]) map to the same ref while
/// at least one reference is outstanding. Reads go straight to the data
/// store; only `add`/`remove`/`find` consult the dictionary.
pub struct UniqueStore<T: UniqueStoreValue> {
    store: DataStore,
    type_id: TypeId,
    dictionary: Dictionary,
    _marker: PhantomData<T>,
}

impl<T: UniqueStoreValue> UniqueStore<T> {
    /// Create a unique store with default buffer sizing
    pub fn new() -> Result<Self> {
        Self::with_config(BufferTypeConfig::default())
    }

    /// Create a unique store with custom buffer sizing
    pub fn with_config(config: BufferTypeConfig) -> Result<Self> {
        let mut store = DataStore::with_max_buffers(config.max_buffers)?;
        let type_id = store.add_type::<UniqueStoreEntry<T>>(config)?;
        Ok(Self {
            store,
            type_id,
            dictionary: Dictionary::new(),
            _marker: PhantomData,
        })
    }

    /// Add one reference to `value`, storing it if it is new
    pub fn add(&mut self, value: T) -> Result<EntryRef> {
        let found = {
            let cmp = UniqueStoreComparator::with_fallback(&self.store, &value);
            self.dictionary.find(&cmp, EntryRef::invalid())?
        };
        match found {
            Ok(index) => {
                let entry = self.indexed(index)?;
                self.entry_mut(entry)?.inc_ref_count()?;
                Ok(entry)
            }
            Err(index) => {
                let entry = self
                    .store
                    .allocate(self.type_id, UniqueStoreEntry::new(value))?;
                self.dictionary.insert_at(index, entry)?;
                debug!(%entry, distinct = self.dictionary.len(), "Inserted unique value");
                Ok(entry)
            }
        }
    }

    /// Ref of an already stored value equal to `value`, without adding a
    /// reference
    pub fn find(&self, value: &T) -> Result<Option<EntryRef>> {
        let cmp = UniqueStoreComparator::with_fallback(&self.store, value);
        match self.dictionary.find(&cmp, EntryRef::invalid())? {
            Ok(index) => self.indexed(index).map(Some),
            Err(_) => Ok(None),
        }
    }

    /// Value behind `entry`
    ///
    /// Refs taken before a compaction stay readable while a guard taken
    /// before that compaction is held. After the guard is gone and the old
    /// buffer is reclaimed, a stale ref fails with `InvalidRef` only until
    /// its buffer id is reused; from then on it reads whatever now lives at
    /// that slot. Translate held refs with [`Compaction::remap`].
    pub fn get(&self, entry: EntryRef) -> Result<&T> {
        self.store
            .get::<UniqueStoreEntry<T>>(entry)
            .map(UniqueStoreEntry::value)
    }

    /// Outstanding references to a live entry
    pub fn ref_count(&self, entry: EntryRef) -> Result<u32> {
        if !self.store.is_live(entry) {
            return Err(Error::InvalidRef(format!("{} is not a live entry", entry)));
        }
        self.store
            .get::<UniqueStoreEntry<T>>(entry)
            .map(UniqueStoreEntry::ref_count)
    }

    /// Release one reference; the last release drops the value
    pub fn remove(&mut self, entry: EntryRef) -> Result<()> {
        let remaining = self.entry_mut(entry)?.dec_ref_count()?;
        if remaining > 0 {
            return Ok(());
        }

        let removed = {
            let cmp = UniqueStoreComparator::<T>::new(&self.store);
            self.dictionary.remove(&cmp, entry)?
        };
        if !removed {
            return Err(Error::Internal(format!(
                "{} reached zero references but is not in the dictionary",
                entry
            )));
        }
        self.store.remove(entry)?;
        debug!(%entry, distinct = self.dictionary.len(), "Removed unique value");
        Ok(())
    }

    /// Move all live values into fresh buffers and rewrite the dictionary
    ///
    /// Callers holding refs across the call must translate them with
    /// [`Compaction::remap`]. Old buffers stay readable for guards taken
    /// before the call. Fails with `CapacityExhausted`, leaving the store
    /// unchanged, when there are not enough free buffers for the live
    /// values.
    pub fn compact(&mut self) -> Result<Compaction> {
        let compaction = self
            .store
            .compact::<UniqueStoreEntry<T>, _>(self.type_id, |_, _| {})?;
        self.dictionary.remap(|entry| compaction.remap(entry));
        info!(
            moved = compaction.moved(),
            distinct = self.dictionary.len(),
            "Unique store compacted"
        );
        Ok(compaction)
    }

    /// Advance the generation and free every held buffer no reader can
    /// still observe. Returns the number of buffers freed.
    pub fn reclaim_memory(&mut self) -> Result<usize> {
        self.store.increment_generation();
        self.store.reclaim_memory()
    }

    /// Pin the current generation for a reader
    pub fn take_guard(&self) -> GenerationGuard {
        self.store.take_guard()
    }

    /// Shareable generation handle for reader threads
    pub fn generation_handler(&self) -> &GenerationHandler {
        self.store.generation_handler()
    }

    /// Live `(ref, value)` pairs in value order
    ///
    /// Borrowing the store for the iteration keeps writers out.
    pub fn iter(&self) -> impl Iterator<Item = (EntryRef, &T)> + '_ {
        self.dictionary
            .iter()
            .filter_map(move |entry| match self.get(entry) {
                Ok(value) => Some((entry, value)),
                Err(e) => {
                    warn!(%entry, error = %e, "Skipping unreadable dictionary entry");
                    None
                }
            })
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.dictionary.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dictionary.is_empty()
    }

    pub fn stats(&self) -> CapacityStats {
        self.store.type_stats(self.type_id)
    }

    /// Check dictionary order and that every indexed entry is live
    pub fn verify(&self) -> Result<()> {
        let cmp = UniqueStoreComparator::<T>::new(&self.store);
        self.dictionary.verify(&cmp)?;
        for entry in self.dictionary.iter() {
            if self.ref_count(entry)? == 0 {
                return Err(Error::Internal(format!("{} indexed with zero references", entry)));
            }
        }
        Ok(())
    }

    pub fn data_store(&self) -> &DataStore {
        &self.store
    }

    fn indexed(&self, index: usize) -> Result<EntryRef> {
        self.dictionary
            .get(index)
            .ok_or_else(|| Error::Internal(format!("dictionary index {} out of range", index)))
    }

    fn entry_mut(&mut self, entry: EntryRef) -> Result<&mut UniqueStoreEntry<T>> {
        self.store.get_mut::<UniqueStoreEntry<T>>(entry)
    }
}

impl<T: UniqueStoreValue> std::fmt::Debug for UniqueStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniqueStore")
            .field("type", &std::any::type_name::<T>())
            .field("distinct", &self.dictionary.len())
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> BufferTypeConfig {
        BufferTypeConfig {
            entries_per_buffer: 4,
            initial_entries: 4,
            max_buffers: 64,
        }
    }

    #[test]
    fn test_add_dedupes() -> Result<()> {
        let mut store = UniqueStore::<String>::new()?;
        let a = store.add("alpha".to_string())?;
        let b = store.add("beta".to_string())?;
        let a2 = store.add("alpha".to_string())?;

        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
        assert_eq!(store.ref_count(a)?, 2);
        assert_eq!(store.ref_count(b)?, 1);
        assert_eq!(store.get(a)?, "alpha");
        store.verify()?;
        Ok(())
    }

    #[test]
    fn test_remove_to_zero_drops_value() -> Result<()> {
        let mut store = UniqueStore::<u32>::with_config(small())?;
        let r = store.add(7)?;
        store.add(7)?;

        store.remove(r)?;
        assert_eq!(store.ref_count(r)?, 1);
        assert_eq!(store.find(&7)?, Some(r));

        store.remove(r)?;
        assert_eq!(store.find(&7)?, None);
        assert!(store.is_empty());
        assert!(matches!(store.ref_count(r), Err(Error::InvalidRef(_))));
        assert!(matches!(store.remove(r), Err(Error::InvalidRef(_))));

        let fresh = store.add(7)?;
        assert_ne!(fresh, r);
        assert_eq!(store.ref_count(fresh)?, 1);
        Ok(())
    }

    #[test]
    fn test_invalid_ref_is_reported() -> Result<()> {
        let mut store = UniqueStore::<u32>::new()?;
        let err = store.get(EntryRef::invalid()).unwrap_err();
        assert!(matches!(err, Error::InvalidRef(_)));
        assert!(store.remove(EntryRef::invalid()).is_err());
        Ok(())
    }

    #[test]
    fn test_iter_in_value_order() -> Result<()> {
        let mut store = UniqueStore::<i32>::with_config(small())?;
        for v in [5, -3, 12, 5, 0, 12] {
            store.add(v)?;
        }
        let values: Vec<i32> = store.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![-3, 0, 5, 12]);
        for (entry, value) in store.iter() {
            assert_eq!(store.get(entry)?, value);
        }
        Ok(())
    }

    #[test]
    fn test_compact_rewrites_dictionary() -> Result<()> {
        let mut store = UniqueStore::<u64>::with_config(small())?;
        let refs: Vec<_> = (0..12u64).map(|v| store.add(v)).collect::<Result<_>>()?;
        store.add(5)?;
        // Drop even offsets: values 0, 2, 4, 6, 8, 10
        for r in refs.iter().filter(|r| r.offset() % 2 == 0) {
            store.remove(*r)?;
        }
        let before: Vec<(EntryRef, u64)> = store.iter().map(|(r, v)| (r, *v)).collect();

        let compaction = store.compact()?;
        assert_eq!(compaction.moved(), before.len());
        store.verify()?;

        for (old, value) in &before {
            let new = compaction.remap(*old);
            assert_ne!(new, *old);
            assert_eq!(store.get(new)?, value);
            assert_eq!(store.find(value)?, Some(new));
        }
        // Reference counts travel with the values
        let five = compaction.remap(refs[5]);
        assert_eq!(store.ref_count(five)?, 2);
        assert_eq!(store.find(&4)?, None);

        let stats = store.stats();
        assert_eq!(stats.live_entries(), before.len() as u64);
        store.reclaim_memory()?;
        assert_eq!(store.stats().dead_entries, 0);
        Ok(())
    }

    #[test]
    fn test_compact_without_headroom_keeps_store_usable() -> Result<()> {
        let mut store = UniqueStore::<u64>::with_config(BufferTypeConfig {
            entries_per_buffer: 4,
            initial_entries: 4,
            max_buffers: 6,
        })?;
        let refs: Vec<_> = (0..13u64).map(|v| store.add(v)).collect::<Result<_>>()?;
        store.remove(refs[0])?;

        let err = store.compact().unwrap_err();
        assert!(matches!(err, Error::CapacityExhausted(_)));

        store.verify()?;
        assert_eq!(store.add(1)?, refs[1]);
        assert_eq!(store.ref_count(refs[1])?, 2);
        store.remove(refs[1])?;
        store.remove(refs[1])?;
        assert_eq!(store.find(&1)?, None);
        assert_eq!(store.iter().count(), 11);

        let fresh = store.add(100)?;
        assert_eq!(*store.get(fresh)?, 100);
        store.verify()?;
        Ok(())
    }

    #[test]
    fn test_iter_skips_unreadable_entries() -> Result<()> {
        let mut store = UniqueStore::<u32>::with_config(small())?;
        store.add(1)?;
        store.add(2)?;
        let len = store.dictionary.len();
        store.dictionary.insert_at(len, EntryRef::pack(40, 0))?;

        let values: Vec<u32> = store.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![1, 2]);
        assert!(store.verify().is_err());
        Ok(())
    }
}
