//! Entry references for the data store

use std::fmt;

/// Number of bits used for the offset within a buffer
pub const OFFSET_BITS: u32 = 22;
/// Number of bits used for the buffer id
pub const BUFFER_ID_BITS: u32 = 32 - OFFSET_BITS;

/// Entries addressable within one buffer
pub const OFFSET_LIMIT: u32 = 1 << OFFSET_BITS;
/// Buffer ids that can be issued. The highest id is never handed out so
/// that the all-ones pattern stays free for [`EntryRef::invalid`].
pub const MAX_BUFFERS: u32 = (1 << BUFFER_ID_BITS) - 1;

const OFFSET_MASK: u32 = OFFSET_LIMIT - 1;
const INVALID: u32 = u32::MAX;

/// Opaque handle to one entry in a [`DataStore`](super::DataStore)
///
/// Packs a buffer id (high bits) and an offset within that buffer (low bits)
/// into a single `u32`. Ordering and equality compare the packed value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryRef(u32);

impl EntryRef {
    /// Pack a buffer id and offset into a reference
    ///
    /// # Panics
    /// If `buffer_id` or `offset` does not fit its bit width. Such a ref
    /// would alias another entry, so this is treated as a programming error.
    pub fn pack(buffer_id: u32, offset: u32) -> Self {
        assert!(
            buffer_id < MAX_BUFFERS,
            "buffer id {} exceeds {} addressable buffers",
            buffer_id,
            MAX_BUFFERS
        );
        assert!(
            offset < OFFSET_LIMIT,
            "offset {} exceeds {} addressable entries per buffer",
            offset,
            OFFSET_LIMIT
        );
        Self((buffer_id << OFFSET_BITS) | offset)
    }

    /// Split the reference into `(buffer_id, offset)`
    pub fn unpack(self) -> (u32, u32) {
        (self.buffer_id(), self.offset())
    }

    /// The reserved "no entry" reference
    pub const fn invalid() -> Self {
        Self(INVALID)
    }

    pub fn is_valid(self) -> bool {
        self.0 != INVALID
    }

    pub fn buffer_id(self) -> u32 {
        self.0 >> OFFSET_BITS
    }

    pub fn offset(self) -> u32 {
        self.0 & OFFSET_MASK
    }

    /// Raw packed value
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Rebuild a reference from a raw packed value
    pub fn from_u32(raw: u32) -> Self {
        Self(raw)
    }
}

impl Default for EntryRef {
    fn default() -> Self {
        Self::invalid()
    }
}

impl fmt::Debug for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "EntryRef(buffer={}, offset={})", self.buffer_id(), self.offset())
        } else {
            write!(f, "EntryRef(invalid)")
        }
    }
}
