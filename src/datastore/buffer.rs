//! Buffer management for the data store

use super::buffer_type::{BufferTypeConfig, TypeId};
use super::generation::Generation;
use crate::error::{Error, Result};
use serde::Serialize;
use std::any::Any;
use std::fmt;

/// Lifecycle of a buffer
///
/// `Free -> Active -> Hold -> PendingReclaim -> Free`. A buffer never goes
/// back from `Hold` to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BufferState {
    /// No storage attached; the id may be handed out again
    Free,
    /// Current allocation target for its type
    Active,
    /// No longer receiving allocations, may still hold live entries
    Hold,
    /// On the hold list, waiting for readers to move past its generation
    PendingReclaim,
}

impl fmt::Display for BufferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BufferState::Free => "free",
            BufferState::Active => "active",
            BufferState::Hold => "hold",
            BufferState::PendingReclaim => "pending_reclaim",
        };
        f.write_str(name)
    }
}

/// A fixed-capacity, append-only array of entries of one type
///
/// Storage is type-erased (`Vec<T>` behind `dyn Any`) so one data store can
/// own buffers of several entry types.
pub(crate) struct Buffer {
    id: u32,
    state: BufferState,
    type_id: Option<TypeId>,
    capacity: u32,
    data: Option<Box<dyn Any + Send + Sync>>,
    /// One flag per used slot; its length is the buffer extent
    dead: Vec<bool>,
    dead_count: u32,
    held_at: Option<Generation>,
}

impl Buffer {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            state: BufferState::Free,
            type_id: None,
            capacity: 0,
            data: None,
            dead: Vec::new(),
            dead_count: 0,
            held_at: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn state(&self) -> BufferState {
        self.state
    }

    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// First unused offset
    pub fn extent(&self) -> u32 {
        self.dead.len() as u32
    }

    pub fn dead_count(&self) -> u32 {
        self.dead_count
    }

    pub fn live_count(&self) -> u32 {
        self.extent() - self.dead_count
    }

    pub fn held_at(&self) -> Option<Generation> {
        self.held_at
    }

    pub fn is_full(&self) -> bool {
        self.extent() >= self.capacity
    }

    /// Free -> Active
    pub fn activate<T: Send + Sync + 'static>(
        &mut self,
        type_id: TypeId,
        config: &BufferTypeConfig,
    ) -> Result<()> {
        self.expect_state(BufferState::Free, "activate")?;
        let reserve = config.next_reservation(0);
        self.state = BufferState::Active;
        self.type_id = Some(type_id);
        self.capacity = config.entries_per_buffer;
        self.data = Some(Box::new(Vec::<T>::with_capacity(reserve)));
        self.dead = Vec::with_capacity(reserve);
        self.dead_count = 0;
        self.held_at = None;
        Ok(())
    }

    /// Active -> Hold
    pub fn retire(&mut self) -> Result<()> {
        self.expect_state(BufferState::Active, "retire")?;
        self.state = BufferState::Hold;
        Ok(())
    }

    /// Hold -> PendingReclaim
    pub fn hold(&mut self, generation: Generation) -> Result<()> {
        self.expect_state(BufferState::Hold, "hold")?;
        self.state = BufferState::PendingReclaim;
        self.held_at = Some(generation);
        Ok(())
    }

    /// PendingReclaim -> Free, dropping all entries
    pub fn reclaim(&mut self) -> Result<()> {
        self.expect_state(BufferState::PendingReclaim, "reclaim")?;
        *self = Buffer::new(self.id);
        Ok(())
    }

    /// Append a value, returning its offset
    pub fn push<T: Send + Sync + 'static>(
        &mut self,
        value: T,
        config: &BufferTypeConfig,
    ) -> Result<u32> {
        self.expect_state(BufferState::Active, "push")?;
        if self.is_full() {
            return Err(Error::Internal(format!(
                "push into full buffer {} (capacity {})",
                self.id, self.capacity
            )));
        }
        let id = self.id;
        let entries = self.entries_mut::<T>()?;
        if entries.len() == entries.capacity() {
            let additional = config.next_reservation(entries.len()) - entries.len();
            entries.reserve_exact(additional.max(1));
        }
        entries.push(value);
        let offset = entries.len() as u32 - 1;
        self.dead.push(false);
        debug_assert_eq!(self.extent(), offset + 1, "buffer {} extent out of sync", id);
        Ok(offset)
    }

    pub fn get<T: 'static>(&self, offset: u32) -> Result<&T> {
        self.check_readable(offset)?;
        let entries = self.entries::<T>()?;
        entries
            .get(offset as usize)
            .ok_or_else(|| self.out_of_range(offset))
    }

    pub fn get_mut<T: 'static>(&mut self, offset: u32) -> Result<&mut T> {
        self.check_readable(offset)?;
        if self.dead[offset as usize] {
            return Err(Error::InvalidRef(format!(
                "entry {} in buffer {} is dead",
                offset, self.id
            )));
        }
        let id = self.id;
        let entries = self.entries_mut::<T>()?;
        let len = entries.len();
        entries.get_mut(offset as usize).ok_or_else(|| {
            Error::Internal(format!(
                "offset {} beyond {} entries in buffer {}",
                offset, len, id
            ))
        })
    }

    pub fn is_live(&self, offset: u32) -> bool {
        self.state != BufferState::Free
            && self.dead.get(offset as usize).is_some_and(|dead| !dead)
    }

    /// Flag one slot as dead; its value stays readable until reclaim
    pub fn mark_dead(&mut self, offset: u32) -> Result<()> {
        self.check_readable(offset)?;
        let slot = &mut self.dead[offset as usize];
        if *slot {
            return Err(Error::InvalidRef(format!(
                "entry {} in buffer {} is already dead",
                offset, self.id
            )));
        }
        *slot = true;
        self.dead_count += 1;
        Ok(())
    }

    /// Live entries with their offsets, in offset order
    pub fn live_entries<T: 'static>(&self) -> Result<impl Iterator<Item = (u32, &T)> + '_> {
        let entries = self.entries::<T>()?;
        Ok(entries
            .iter()
            .zip(self.dead.iter())
            .enumerate()
            .filter(|(_, (_, dead))| !**dead)
            .map(|(offset, (value, _))| (offset as u32, value)))
    }

    fn entries<T: 'static>(&self) -> Result<&Vec<T>> {
        self.data
            .as_ref()
            .and_then(|data| data.downcast_ref::<Vec<T>>())
            .ok_or_else(|| self.type_mismatch::<T>())
    }

    fn entries_mut<T: 'static>(&mut self) -> Result<&mut Vec<T>> {
        if !self.data.as_ref().is_some_and(|data| data.is::<Vec<T>>()) {
            return Err(self.type_mismatch::<T>());
        }
        let id = self.id;
        self.data
            .as_mut()
            .and_then(|data| data.downcast_mut::<Vec<T>>())
            .ok_or_else(|| Error::Internal(format!("buffer {} storage vanished", id)))
    }

    fn check_readable(&self, offset: u32) -> Result<()> {
        if self.state == BufferState::Free {
            return Err(Error::InvalidRef(format!(
                "buffer {} has been reclaimed",
                self.id
            )));
        }
        if offset >= self.extent() {
            return Err(self.out_of_range(offset));
        }
        Ok(())
    }

    fn out_of_range(&self, offset: u32) -> Error {
        Error::InvalidRef(format!(
            "offset {} beyond extent {} of buffer {}",
            offset,
            self.extent(),
            self.id
        ))
    }

    fn type_mismatch<T>(&self) -> Error {
        Error::TypeMismatch(format!(
            "buffer {} ({:?}) does not hold {}",
            self.id,
            self.type_id,
            std::any::type_name::<T>()
        ))
    }

    fn expect_state(&self, expected: BufferState, op: &str) -> Result<()> {
        if self.state != expected {
            return Err(Error::Internal(format!(
                "cannot {} buffer {} in state {} (expected {})",
                op, self.id, self.state, expected
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("type_id", &self.type_id)
            .field("capacity", &self.capacity)
            .field("extent", &self.extent())
            .field("dead_count", &self.dead_count)
            .field("held_at", &self.held_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capacity: u32) -> BufferTypeConfig {
        BufferTypeConfig {
            entries_per_buffer: capacity,
            initial_entries: 2,
            max_buffers: 8,
        }
    }

    #[test]
    fn test_buffer_lifecycle() -> Result<()> {
        let cfg = config(4);
        let mut buffer = Buffer::new(3);
        assert_eq!(buffer.state(), BufferState::Free);

        buffer.activate::<u64>(TypeId(0), &cfg)?;
        assert_eq!(buffer.state(), BufferState::Active);

        buffer.retire()?;
        assert_eq!(buffer.state(), BufferState::Hold);

        buffer.hold(7)?;
        assert_eq!(buffer.state(), BufferState::PendingReclaim);
        assert_eq!(buffer.held_at(), Some(7));

        buffer.reclaim()?;
        assert_eq!(buffer.state(), BufferState::Free);
        assert_eq!(buffer.id(), 3);
        assert_eq!(buffer.extent(), 0);
        Ok(())
    }

    #[test]
    fn test_no_state_skipping() -> Result<()> {
        let cfg = config(4);
        let mut buffer = Buffer::new(0);
        assert!(buffer.retire().is_err());
        assert!(buffer.hold(1).is_err());

        buffer.activate::<u64>(TypeId(0), &cfg)?;
        assert!(buffer.hold(1).is_err());
        assert!(buffer.reclaim().is_err());
        assert!(buffer.activate::<u64>(TypeId(0), &cfg).is_err());

        buffer.retire()?;
        assert!(buffer.retire().is_err());
        assert!(buffer.activate::<u64>(TypeId(0), &cfg).is_err());
        Ok(())
    }

    #[test]
    fn test_push_and_get() -> Result<()> {
        let cfg = config(3);
        let mut buffer = Buffer::new(0);
        buffer.activate::<String>(TypeId(1), &cfg)?;

        assert_eq!(buffer.push("a".to_string(), &cfg)?, 0);
        assert_eq!(buffer.push("b".to_string(), &cfg)?, 1);
        assert_eq!(buffer.push("c".to_string(), &cfg)?, 2);
        assert!(buffer.is_full());
        assert!(buffer.push("d".to_string(), &cfg).is_err());

        assert_eq!(buffer.get::<String>(1)?, "b");
        buffer.get_mut::<String>(2)?.push('!');
        assert_eq!(buffer.get::<String>(2)?, "c!");
        assert!(buffer.get::<String>(3).is_err());
        Ok(())
    }

    #[test]
    fn test_type_mismatch() -> Result<()> {
        let cfg = config(3);
        let mut buffer = Buffer::new(0);
        buffer.activate::<u32>(TypeId(0), &cfg)?;
        buffer.push(5u32, &cfg)?;

        let err = buffer.get::<u64>(0).unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));
        assert!(buffer.push(5u64, &cfg).is_err());
        Ok(())
    }

    #[test]
    fn test_dead_accounting() -> Result<()> {
        let cfg = config(8);
        let mut buffer = Buffer::new(0);
        buffer.activate::<u32>(TypeId(0), &cfg)?;
        for v in 0..5u32 {
            buffer.push(v * 10, &cfg)?;
        }

        buffer.mark_dead(1)?;
        buffer.mark_dead(3)?;
        assert!(buffer.mark_dead(3).is_err());
        assert_eq!(buffer.dead_count(), 2);
        assert_eq!(buffer.live_count(), 3);
        assert!(buffer.dead_count() <= buffer.extent());

        // Dead values stay readable but not writable
        assert_eq!(*buffer.get::<u32>(1)?, 10);
        assert!(buffer.get_mut::<u32>(1).is_err());
        assert!(!buffer.is_live(1));
        assert!(buffer.is_live(2));

        let live: Vec<_> = buffer.live_entries::<u32>()?.map(|(o, v)| (o, *v)).collect();
        assert_eq!(live, vec![(0, 0), (2, 20), (4, 40)]);
        Ok(())
    }

    #[test]
    fn test_reclaimed_buffer_rejects_reads() -> Result<()> {
        let cfg = config(4);
        let mut buffer = Buffer::new(0);
        buffer.activate::<u32>(TypeId(0), &cfg)?;
        buffer.push(1u32, &cfg)?;
        buffer.retire()?;
        buffer.hold(0)?;
        assert_eq!(*buffer.get::<u32>(0)?, 1);

        buffer.reclaim()?;
        let err = buffer.get::<u32>(0).unwrap_err();
        assert!(matches!(err, Error::InvalidRef(_)));
        assert!(!buffer.is_live(0));
        Ok(())
    }
}
