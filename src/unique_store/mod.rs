//! Unique store
//!
//! Deduplicating value storage on top of the [`DataStore`](crate::datastore::DataStore).
//!
//! # Architecture
//!
//! ```text
//! UniqueStore<T>
//!   ├─→ Dictionary   [r3, r0, r7]        sorted by value via comparator
//!   │                  │   │   └─→ NaN      (refs 2)
//!   │                  │   └─────→ 2.5      (refs 1)
//!   │                  └─────────→ 1.5      (refs 2)
//!   └─→ DataStore    UniqueStoreEntry { value, ref_count }
//! ```
//!
//! `add` probes the dictionary with the new value as the comparator's
//! fallback, so nothing is allocated for a value that is already present.

pub mod comparator;
pub mod dictionary;
pub mod entry;
pub mod store;

pub use comparator::{EntryComparator, UniqueStoreComparator, UniqueStoreValue};
pub use dictionary::Dictionary;
pub use entry::UniqueStoreEntry;
pub use store::UniqueStore;
