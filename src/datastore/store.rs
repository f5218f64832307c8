//! Data store implementation

use super::buffer::{Buffer, BufferState};
use super::buffer_type::{BufferType, BufferTypeConfig, TypeId};
use super::entry_ref::{EntryRef, MAX_BUFFERS};
use super::generation::{Generation, GenerationGuard, GenerationHandler};
use super::hold_list::GenerationHoldList;
use crate::error::{Error, Result};
use crate::metrics;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info};

/// Compacting arena of typed buffers addressed by [`EntryRef`]
///
/// Single writer: every mutating call takes `&mut self`. Readers that must
/// keep refs valid across a compaction pin a generation with
/// [`take_guard`](Self::take_guard) *before* capturing the refs; buffers
/// retired after that point stay readable until the guard is dropped and
/// the writer calls [`reclaim_memory`](Self::reclaim_memory).
pub struct DataStore {
    /// Indexed by buffer id; grows lazily up to `max_buffers`
    buffers: Vec<Buffer>,
    /// Reclaimed ids, reused oldest-first once fresh ids run out
    free_ids: VecDeque<u32>,
    max_buffers: u32,
    types: Vec<BufferType>,
    hold_list: GenerationHoldList<u32>,
    generation: GenerationHandler,
}

impl DataStore {
    /// Create an empty data store with the full buffer id space
    pub fn new() -> Self {
        Self {
            buffers: Vec::new(),
            free_ids: VecDeque::new(),
            max_buffers: MAX_BUFFERS,
            types: Vec::new(),
            hold_list: GenerationHoldList::new(),
            generation: GenerationHandler::new(),
        }
    }

    /// Create a data store limited to `max_buffers` buffer ids
    pub fn with_max_buffers(max_buffers: u32) -> Result<Self> {
        if max_buffers == 0 || max_buffers > MAX_BUFFERS {
            return Err(Error::Config(format!(
                "max_buffers must be in 1..={}, got {}",
                MAX_BUFFERS, max_buffers
            )));
        }
        Ok(Self {
            max_buffers,
            ..Self::new()
        })
    }

    /// Register an entry type and get its id
    pub fn add_type<T: Send + Sync + 'static>(&mut self, config: BufferTypeConfig) -> Result<TypeId> {
        config.validate()?;
        let id = u16::try_from(self.types.len())
            .map_err(|_| Error::Config("too many entry types".to_string()))?;
        let buffer_type = BufferType::new::<T>(config);
        debug!(type_id = id, type_name = buffer_type.type_name, ?config, "Registered buffer type");
        self.types.push(buffer_type);
        Ok(TypeId(id))
    }

    /// Store `value` in the active buffer for `type_id`
    ///
    /// Rolls to a fresh buffer when the active one is full; the old one goes
    /// to `Hold` and never receives allocations again.
    pub fn allocate<T: Send + Sync + 'static>(&mut self, type_id: TypeId, value: T) -> Result<EntryRef> {
        self.check_type::<T>(type_id)?;
        let buffer_id = self.active_buffer_for::<T>(type_id)?;
        let config = self.types[type_id.0 as usize].config;
        let offset = self.buffers[buffer_id as usize].push(value, &config)?;
        Ok(EntryRef::pack(buffer_id, offset))
    }

    pub fn get<T: 'static>(&self, entry: EntryRef) -> Result<&T> {
        let (buffer_id, offset) = self.locate(entry)?;
        self.buffers[buffer_id].get(offset)
    }

    /// Mutable access to a live entry
    pub fn get_mut<T: 'static>(&mut self, entry: EntryRef) -> Result<&mut T> {
        let (buffer_id, offset) = self.locate(entry)?;
        self.buffers[buffer_id].get_mut(offset)
    }

    /// Mark an entry dead. Its value stays readable until its buffer is
    /// reclaimed; removing it a second time is an error.
    pub fn remove(&mut self, entry: EntryRef) -> Result<()> {
        let (buffer_id, offset) = self.locate(entry)?;
        self.buffers[buffer_id].mark_dead(offset)
    }

    pub fn is_live(&self, entry: EntryRef) -> bool {
        self.locate(entry)
            .map(|(buffer_id, offset)| self.buffers[buffer_id].is_live(offset))
            .unwrap_or(false)
    }

    pub fn buffer_state(&self, buffer_id: u32) -> Option<BufferState> {
        self.buffers.get(buffer_id as usize).map(Buffer::state)
    }

    /// Queue a buffer for reclamation once no reader can observe
    /// `generation`. An active buffer is retired first.
    ///
    /// Nothing changes when the buffer cannot be held or `generation` is
    /// older than the newest held buffer.
    pub fn hold(&mut self, buffer_id: u32, generation: Generation) -> Result<()> {
        let buffer = self
            .buffers
            .get_mut(buffer_id as usize)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown buffer {}", buffer_id)))?;
        if !matches!(buffer.state(), BufferState::Active | BufferState::Hold) {
            return Err(Error::InvalidArgument(format!(
                "buffer {} is {} and cannot be held",
                buffer_id,
                buffer.state()
            )));
        }
        self.hold_list.check_insert(generation)?;
        if buffer.state() == BufferState::Active {
            buffer.retire()?;
            if let Some(type_id) = buffer.type_id() {
                self.types[type_id.0 as usize].active_buffer = None;
            }
        }
        self.buffers[buffer_id as usize].hold(generation)?;
        self.hold_list.insert(buffer_id, generation)?;
        debug!(buffer_id, generation, "Buffer on hold");
        Ok(())
    }

    /// Free every held buffer whose generation is strictly below
    /// `oldest_used`. Returns the number of buffers reclaimed.
    pub fn reclaim(&mut self, oldest_used: Generation) -> Result<usize> {
        let released = self.hold_list.reclaim(oldest_used);
        for &buffer_id in &released {
            let buffer = &mut self.buffers[buffer_id as usize];
            let type_id = buffer.type_id();
            debug!(buffer_id, held_at = ?buffer.held_at(), "Reclaiming buffer");
            buffer.reclaim()?;
            if let Some(type_id) = type_id {
                let buffer_type = &mut self.types[type_id.0 as usize];
                buffer_type.buffer_count = buffer_type.buffer_count.saturating_sub(1);
            }
            self.free_ids.push_back(buffer_id);
        }
        if !released.is_empty() {
            metrics::record_reclaimed(released.len());
            info!(
                reclaimed = released.len(),
                oldest_used,
                still_held = self.hold_list.len(),
                "Reclaimed held buffers"
            );
        }
        Ok(released.len())
    }

    /// Reclaim using the handler's current oldest used generation
    pub fn reclaim_memory(&mut self) -> Result<usize> {
        let oldest_used = self.generation.oldest_used_generation();
        self.reclaim(oldest_used)
    }

    /// Move every live entry of `type_id` into fresh buffers
    ///
    /// `on_move(old, new)` is called for each relocated entry in iteration
    /// order (buffer id, then offset). Afterwards the generation is bumped
    /// and all old buffers are put on hold at the new generation. Order of
    /// entries across compaction is not otherwise guaranteed.
    ///
    /// The live entries need free buffers of their own while the old ones
    /// are still held. Without that headroom the call fails with
    /// `CapacityExhausted` and leaves the store untouched.
    pub fn compact<T, F>(&mut self, type_id: TypeId, mut on_move: F) -> Result<Compaction>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut(EntryRef, EntryRef),
    {
        self.check_type::<T>(type_id)?;

        let old_buffers: Vec<u32> = self
            .buffers
            .iter()
            .filter(|b| {
                b.type_id() == Some(type_id)
                    && matches!(b.state(), BufferState::Active | BufferState::Hold)
            })
            .map(Buffer::id)
            .collect();

        let live_entries: u64 = old_buffers
            .iter()
            .map(|&id| u64::from(self.buffers[id as usize].live_count()))
            .sum();
        self.check_compaction_headroom(type_id, live_entries)?;
        self.hold_list
            .check_insert(self.generation.current_generation() + 1)?;

        if let Some(active) = self.types[type_id.0 as usize].active_buffer.take() {
            self.buffers[active as usize].retire()?;
        }

        let mut remapping = HashMap::new();
        for &buffer_id in &old_buffers {
            let live: Vec<(u32, T)> = self.buffers[buffer_id as usize]
                .live_entries::<T>()?
                .map(|(offset, value)| (offset, value.clone()))
                .collect();
            for (offset, value) in live {
                let old = EntryRef::pack(buffer_id, offset);
                let new = self.allocate(type_id, value)?;
                self.buffers[buffer_id as usize].mark_dead(offset)?;
                remapping.insert(old, new);
                on_move(old, new);
            }
        }

        let generation = self.generation.increment_generation();
        for &buffer_id in &old_buffers {
            self.hold(buffer_id, generation)?;
        }

        metrics::record_compaction();
        info!(
            type_id = type_id.0,
            moved = remapping.len(),
            held_buffers = old_buffers.len(),
            generation,
            "Compacted buffers"
        );

        Ok(Compaction {
            remapping,
            held_buffers: old_buffers,
            generation,
        })
    }

    /// Live entries of `type_id` in buffer-id/offset order
    ///
    /// Order is not stable across compactions.
    pub fn iter<T: 'static>(&self, type_id: TypeId) -> Result<impl Iterator<Item = (EntryRef, &T)> + '_> {
        self.check_type::<T>(type_id)?;
        Ok(self
            .buffers
            .iter()
            .filter(move |b| {
                b.type_id() == Some(type_id)
                    && matches!(b.state(), BufferState::Active | BufferState::Hold)
            })
            .flat_map(|b| {
                let id = b.id();
                b.live_entries::<T>()
                    .into_iter()
                    .flatten()
                    .map(move |(offset, value)| (EntryRef::pack(id, offset), value))
            }))
    }

    pub fn generation_handler(&self) -> &GenerationHandler {
        &self.generation
    }

    pub fn take_guard(&self) -> GenerationGuard {
        self.generation.take_guard()
    }

    pub fn current_generation(&self) -> Generation {
        self.generation.current_generation()
    }

    pub fn increment_generation(&mut self) -> Generation {
        self.generation.increment_generation()
    }

    pub fn oldest_used_generation(&self) -> Generation {
        self.generation.oldest_used_generation()
    }

    /// Capacity and usage across all types
    pub fn stats(&self) -> CapacityStats {
        self.collect_stats(|_| true)
    }

    /// Capacity and usage of one type
    pub fn type_stats(&self, type_id: TypeId) -> CapacityStats {
        self.collect_stats(|b| b.type_id() == Some(type_id))
    }

    fn collect_stats(&self, include: impl Fn(&Buffer) -> bool) -> CapacityStats {
        let mut stats = CapacityStats {
            generation: self.generation.current_generation(),
            oldest_used_generation: self.generation.oldest_used_generation(),
            ..Default::default()
        };
        for buffer in self.buffers.iter().filter(|b| include(b)) {
            match buffer.state() {
                BufferState::Free => continue,
                BufferState::Active => stats.active_buffers += 1,
                BufferState::Hold => stats.hold_buffers += 1,
                BufferState::PendingReclaim => stats.pending_reclaim_buffers += 1,
            }
            stats.buffer_count += 1;
            stats.allocated_entries += buffer.capacity() as u64;
            stats.used_entries += buffer.extent() as u64;
            stats.dead_entries += buffer.dead_count() as u64;
        }
        stats.free_buffers = (self.max_buffers as usize - self.buffers.len()) + self.free_ids.len();
        stats
    }

    fn check_type<T: 'static>(&self, type_id: TypeId) -> Result<()> {
        let buffer_type = self
            .types
            .get(type_id.0 as usize)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown {}", type_id)))?;
        if !buffer_type.holds::<T>() {
            return Err(Error::TypeMismatch(format!(
                "{} holds {}, not {}",
                type_id,
                buffer_type.type_name,
                std::any::type_name::<T>()
            )));
        }
        Ok(())
    }

    fn active_buffer_for<T: Send + Sync + 'static>(&mut self, type_id: TypeId) -> Result<u32> {
        if let Some(active) = self.types[type_id.0 as usize].active_buffer {
            if !self.buffers[active as usize].is_full() {
                return Ok(active);
            }
        }
        self.switch_active_buffer::<T>(type_id)
    }

    fn switch_active_buffer<T: Send + Sync + 'static>(&mut self, type_id: TypeId) -> Result<u32> {
        let buffer_type = &self.types[type_id.0 as usize];
        let config = buffer_type.config;
        if buffer_type.buffer_count >= config.max_buffers {
            return Err(Error::CapacityExhausted(format!(
                "{} ({}) already owns {} buffers",
                type_id, buffer_type.type_name, buffer_type.buffer_count
            )));
        }

        let buffer_id = self.acquire_buffer_id()?;
        self.buffers[buffer_id as usize].activate::<T>(type_id, &config)?;

        let buffer_type = &mut self.types[type_id.0 as usize];
        if let Some(previous) = buffer_type.active_buffer.replace(buffer_id) {
            self.buffers[previous as usize].retire()?;
        }
        buffer_type.buffer_count += 1;
        debug!(type_id = type_id.0, buffer_id, "Switched active buffer");
        Ok(buffer_id)
    }

    /// Fail unless `live_entries` of `type_id` fit into buffers that can
    /// still be acquired
    fn check_compaction_headroom(&self, type_id: TypeId, live_entries: u64) -> Result<()> {
        let buffer_type = &self.types[type_id.0 as usize];
        let per_buffer = u64::from(buffer_type.config.entries_per_buffer);
        let needed = live_entries.div_ceil(per_buffer);
        let type_room =
            u64::from(buffer_type.config.max_buffers.saturating_sub(buffer_type.buffer_count));
        let free_ids = (self.max_buffers as usize - self.buffers.len()) + self.free_ids.len();
        let room = type_room.min(free_ids as u64);
        if needed > room {
            return Err(Error::CapacityExhausted(format!(
                "compacting {} ({}) needs {} buffers, only {} available",
                type_id, buffer_type.type_name, needed, room
            )));
        }
        Ok(())
    }

    fn acquire_buffer_id(&mut self) -> Result<u32> {
        if (self.buffers.len() as u32) < self.max_buffers {
            let id = self.buffers.len() as u32;
            self.buffers.push(Buffer::new(id));
            return Ok(id);
        }
        self.free_ids.pop_front().ok_or_else(|| {
            Error::CapacityExhausted(format!(
                "all {} buffer ids in use ({} awaiting reclaim)",
                self.max_buffers,
                self.hold_list.len()
            ))
        })
    }

    fn locate(&self, entry: EntryRef) -> Result<(usize, u32)> {
        if !entry.is_valid() {
            return Err(Error::InvalidRef("invalid entry ref".to_string()));
        }
        let (buffer_id, offset) = entry.unpack();
        if buffer_id as usize >= self.buffers.len() {
            return Err(Error::InvalidRef(format!("{} names an unknown buffer", entry)));
        }
        Ok((buffer_id as usize, offset))
    }
}

impl Default for DataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("types", &self.types.len())
            .field("buffers", &self.buffers.len())
            .field("held", &self.hold_list.len())
            .field("generation", &self.generation)
            .finish()
    }
}

/// Outcome of a [`DataStore::compact`] pass
#[derive(Debug, Default)]
pub struct Compaction {
    remapping: HashMap<EntryRef, EntryRef>,
    held_buffers: Vec<u32>,
    generation: Generation,
}

impl Compaction {
    /// New location of `entry`; refs that were not moved map to themselves
    pub fn remap(&self, entry: EntryRef) -> EntryRef {
        self.remapping.get(&entry).copied().unwrap_or(entry)
    }

    pub fn moved(&self) -> usize {
        self.remapping.len()
    }

    /// Buffers put on hold by this pass
    pub fn held_buffers(&self) -> &[u32] {
        &self.held_buffers
    }

    /// Generation the old buffers were held at
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

/// Capacity report used by memory-pressure policies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CapacityStats {
    /// Slots reserved by non-free buffers
    pub allocated_entries: u64,
    /// Slots handed out (live + dead)
    pub used_entries: u64,
    pub dead_entries: u64,
    pub buffer_count: usize,
    pub active_buffers: usize,
    pub hold_buffers: usize,
    pub pending_reclaim_buffers: usize,
    /// Buffer ids available for new buffers
    pub free_buffers: usize,
    pub generation: Generation,
    pub oldest_used_generation: Generation,
}

impl CapacityStats {
    pub fn live_entries(&self) -> u64 {
        self.used_entries.saturating_sub(self.dead_entries)
    }

    /// Dead share of used slots, 0.0 when nothing is used
    pub fn dead_ratio(&self) -> f64 {
        if self.used_entries == 0 {
            0.0
        } else {
            self.dead_entries as f64 / self.used_entries as f64
        }
    }
}
