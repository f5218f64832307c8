//! Entry comparators for the unique store
//!
//! Dictionary ordering never touches raw values directly: it compares
//! [`EntryRef`]s, dereferencing them into the data store. The invalid ref
//! stands for a transient "fallback" value owned by the comparator, which
//! lets a lookup probe for a value that has not been stored yet.

use super::entry::UniqueStoreEntry;
use crate::datastore::{DataStore, EntryRef};
use crate::error::{Error, Result};
use std::cmp::Ordering;

/// Values that can live in a unique store
///
/// `less` must be a strict weak order. Two values are the same entry when
/// neither is less than the other.
pub trait UniqueStoreValue: Clone + Send + Sync + 'static {
    fn less(&self, other: &Self) -> bool;
}

macro_rules! impl_ordered_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl UniqueStoreValue for $ty {
                #[inline]
                fn less(&self, other: &Self) -> bool {
                    self < other
                }
            }
        )*
    };
}

impl_ordered_value!(
    i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, bool, char, String,
    Vec<u8>,
);

// NaN sorts after every number and is equivalent to every other NaN, so all
// NaN payloads share one dictionary slot.
macro_rules! impl_float_value {
    ($($ty:ty),*) => {
        $(
            impl UniqueStoreValue for $ty {
                #[inline]
                fn less(&self, other: &Self) -> bool {
                    if self.is_nan() {
                        false
                    } else if other.is_nan() {
                        true
                    } else {
                        self < other
                    }
                }
            }
        )*
    };
}

impl_float_value!(f32, f64);

/// Ordering over entry refs
pub trait EntryComparator {
    /// `true` when the value behind `lhs` orders before the value behind `rhs`
    fn less(&self, lhs: EntryRef, rhs: EntryRef) -> Result<bool>;

    fn compare(&self, lhs: EntryRef, rhs: EntryRef) -> Result<Ordering> {
        if self.less(lhs, rhs)? {
            Ok(Ordering::Less)
        } else if self.less(rhs, lhs)? {
            Ok(Ordering::Greater)
        } else {
            Ok(Ordering::Equal)
        }
    }

    fn equal(&self, lhs: EntryRef, rhs: EntryRef) -> Result<bool> {
        Ok(self.compare(lhs, rhs)? == Ordering::Equal)
    }
}

/// Compares unique store entries through their refs
///
/// A valid ref is looked up in the data store; the invalid ref maps to the
/// fallback value, if one was given.
pub struct UniqueStoreComparator<'a, T> {
    store: &'a DataStore,
    fallback: Option<&'a T>,
}

impl<'a, T: UniqueStoreValue> UniqueStoreComparator<'a, T> {
    pub fn new(store: &'a DataStore) -> Self {
        Self {
            store,
            fallback: None,
        }
    }

    /// Comparator whose invalid ref stands for `fallback`
    pub fn with_fallback(store: &'a DataStore, fallback: &'a T) -> Self {
        Self {
            store,
            fallback: Some(fallback),
        }
    }

    fn value(&self, entry: EntryRef) -> Result<&'a T> {
        if entry.is_valid() {
            self.store
                .get::<UniqueStoreEntry<T>>(entry)
                .map(UniqueStoreEntry::value)
        } else {
            self.fallback.ok_or_else(|| {
                Error::InvalidRef("invalid ref compared without a fallback value".to_string())
            })
        }
    }
}

impl<T: UniqueStoreValue> EntryComparator for UniqueStoreComparator<'_, T> {
    fn less(&self, lhs: EntryRef, rhs: EntryRef) -> Result<bool> {
        Ok(self.value(lhs)?.less(self.value(rhs)?))
    }
}
