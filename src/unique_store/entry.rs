//! Reference-counted entries of the unique store

use crate::error::{Error, Result};

/// A stored value plus the number of outstanding references to it
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueStoreEntry<T> {
    value: T,
    ref_count: u32,
}

impl<T> UniqueStoreEntry<T> {
    /// Wrap a freshly inserted value (one reference)
    pub fn new(value: T) -> Self {
        Self {
            value,
            ref_count: 1,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count
    }

    pub fn inc_ref_count(&mut self) -> Result<u32> {
        self.ref_count = self
            .ref_count
            .checked_add(1)
            .ok_or_else(|| Error::CapacityExhausted("reference count overflow".to_string()))?;
        Ok(self.ref_count)
    }

    /// Drop one reference, returning how many remain
    pub fn dec_ref_count(&mut self) -> Result<u32> {
        self.ref_count = self
            .ref_count
            .checked_sub(1)
            .ok_or_else(|| Error::InvalidRef("reference count already zero".to_string()))?;
        Ok(self.ref_count)
    }
}
