//! Buffer type registration for the data store

use super::entry_ref::{MAX_BUFFERS, OFFSET_LIMIT};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::any::{type_name, TypeId as RustTypeId};
use std::fmt;

/// Identifier of a registered entry type within one data store
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeId(pub u16);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.0)
    }
}

/// Sizing parameters for the buffers of one entry type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferTypeConfig {
    /// Fixed capacity of each buffer (entries)
    pub entries_per_buffer: u32,
    /// Entries reserved when a buffer is activated; grows by doubling
    pub initial_entries: u32,
    /// Upper bound on buffers this type may hold at once
    pub max_buffers: u32,
}

impl Default for BufferTypeConfig {
    fn default() -> Self {
        Self {
            entries_per_buffer: 64 * 1024,
            initial_entries: 1024,
            max_buffers: MAX_BUFFERS,
        }
    }
}

impl BufferTypeConfig {
    /// Create a config with the given buffer capacity
    pub fn with_capacity(entries_per_buffer: u32) -> Self {
        Self {
            entries_per_buffer,
            initial_entries: entries_per_buffer.min(1024),
            ..Default::default()
        }
    }

    /// Check that the config can be addressed by an [`EntryRef`](super::EntryRef)
    pub fn validate(&self) -> Result<()> {
        if self.entries_per_buffer == 0 || self.entries_per_buffer > OFFSET_LIMIT {
            return Err(Error::Config(format!(
                "entries_per_buffer must be in 1..={}, got {}",
                OFFSET_LIMIT, self.entries_per_buffer
            )));
        }
        if self.initial_entries > self.entries_per_buffer {
            return Err(Error::Config(format!(
                "initial_entries {} exceeds entries_per_buffer {}",
                self.initial_entries, self.entries_per_buffer
            )));
        }
        if self.max_buffers == 0 || self.max_buffers > MAX_BUFFERS {
            return Err(Error::Config(format!(
                "max_buffers must be in 1..={}, got {}",
                MAX_BUFFERS, self.max_buffers
            )));
        }
        Ok(())
    }

    /// Reservation size after `current` entries are used up
    pub fn next_reservation(&self, current: usize) -> usize {
        let cap = self.entries_per_buffer as usize;
        if current == 0 {
            return (self.initial_entries as usize).clamp(1, cap);
        }
        current.saturating_mul(2).min(cap)
    }
}

/// Registered type: config plus the Rust type name for diagnostics
#[derive(Debug, Clone)]
pub(crate) struct BufferType {
    pub config: BufferTypeConfig,
    pub type_name: &'static str,
    pub rust_type: RustTypeId,
    /// Buffer currently receiving allocations, if any
    pub active_buffer: Option<u32>,
    /// Buffers owned by this type that are not yet reclaimed
    pub buffer_count: u32,
}

impl BufferType {
    pub fn new<T: 'static>(config: BufferTypeConfig) -> Self {
        Self {
            config,
            type_name: type_name::<T>(),
            rust_type: RustTypeId::of::<T>(),
            active_buffer: None,
            buffer_count: 0,
        }
    }

    pub fn holds<T: 'static>(&self) -> bool {
        self.rust_type == RustTypeId::of::<T>()
    }
}
